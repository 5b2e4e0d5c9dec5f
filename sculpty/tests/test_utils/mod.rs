#![allow(dead_code)]

use rand::distributions::Uniform;
use rand::prelude::*;
pub use sculpty::test_utils::*;

pub fn init_logger() {
    let _ = env_logger::Builder::from_env("SCULPTY_LOG")
        .is_test(true)
        .try_init();
}

/// Reproducible uniform samples in `[-scale, scale]`.
pub fn random_vector(n: usize, scale: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let range = Uniform::new_inclusive(-scale, scale);
    (0..n).map(|_| rng.sample(range)).collect()
}

/// Directory under the system temporary directory, emptied before use.
pub fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("sculpty_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
