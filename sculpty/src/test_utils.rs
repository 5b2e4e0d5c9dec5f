use crate::basis::ElementKind;
use crate::energy_models::elasticity::ElasticityTensor;
use crate::mesh::Mesh;

/*
 * Setup code
 */

pub const LEFT: i32 = 1;
pub const RIGHT: i32 = 2;
pub const BOTTOM: i32 = 3;
pub const TOP: i32 = 4;

/// A soft material with moduli in the same order of magnitude as the test geometry.
pub fn soft_material(dim: usize) -> ElasticityTensor {
    // Only fails for unsupported dimensions.
    ElasticityTensor::from_young_poisson(dim, 100.0, 0.3).unwrap()
}

/// Tags the four sides of the unit square with `LEFT`, `RIGHT`, `BOTTOM` and `TOP`.
pub fn tag_unit_square_sides(mesh: &mut Mesh) {
    mesh.tag_boundary_where(LEFT, |p| p[0] == 0.0);
    mesh.tag_boundary_where(RIGHT, |p| p[0] == 1.0);
    mesh.tag_boundary_where(BOTTOM, |p| p[1] == 0.0);
    mesh.tag_boundary_where(TOP, |p| p[1] == 1.0);
}

pub fn one_triangle() -> Mesh {
    Mesh::new(
        ElementKind::Triangle,
        vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        vec![0, 1, 2],
    )
    .unwrap()
}

pub fn one_tet() -> Mesh {
    Mesh::new(
        ElementKind::Tetrahedron,
        vec![
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ],
        vec![0, 1, 2, 3],
    )
    .unwrap()
}

/// A single bilinear element covering the unit square.
pub fn unit_square_quad() -> Mesh {
    let mut mesh = Mesh::new(
        ElementKind::Quad,
        vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
        vec![0, 1, 2, 3],
    )
    .unwrap();
    tag_unit_square_sides(&mut mesh);
    mesh
}

/// The unit square split into `n`x`n` cells, two triangles each.
pub fn unit_square_tri_mesh(n: usize) -> Mesh {
    let mut vertices = Vec::new();
    for j in 0..=n {
        for i in 0..=n {
            vertices.push(i as f64 / n as f64);
            vertices.push(j as f64 / n as f64);
        }
    }
    let mut cells = Vec::new();
    for j in 0..n {
        for i in 0..n {
            let v00 = j * (n + 1) + i;
            let v10 = v00 + 1;
            let v01 = v00 + n + 1;
            let v11 = v01 + 1;
            cells.extend_from_slice(&[v00, v10, v11, v00, v11, v01]);
        }
    }
    let mut mesh = Mesh::new(ElementKind::Triangle, vertices, cells).unwrap();
    tag_unit_square_sides(&mut mesh);
    mesh
}

fn unit_cube_vertices() -> Vec<f64> {
    vec![
        0.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        1.0, 1.0, 0.0, //
        0.0, 1.0, 0.0, //
        0.0, 0.0, 1.0, //
        1.0, 0.0, 1.0, //
        1.0, 1.0, 1.0, //
        0.0, 1.0, 1.0,
    ]
}

/// The unit cube split into six tetrahedra around the main diagonal.
pub fn unit_cube_tet_mesh() -> Mesh {
    Mesh::new(
        ElementKind::Tetrahedron,
        unit_cube_vertices(),
        vec![
            0, 1, 2, 6, //
            0, 2, 3, 6, //
            0, 3, 7, 6, //
            0, 7, 4, 6, //
            0, 4, 5, 6, //
            0, 5, 1, 6,
        ],
    )
    .unwrap()
}

pub fn unit_cube_hex() -> Mesh {
    Mesh::new(
        ElementKind::Hexahedron,
        unit_cube_vertices(),
        (0..8).collect(),
    )
    .unwrap()
}

/// Two unit squares side by side along x separated by `gap`, with body ids 0 and 1.
pub fn two_squares(gap: f64) -> Mesh {
    let x0 = 1.0 + gap;
    let vertices = vec![
        0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, //
        x0, 0.0, x0 + 1.0, 0.0, x0 + 1.0, 1.0, x0, 1.0,
    ];
    let cells = vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7];
    Mesh::new(ElementKind::Triangle, vertices, cells)
        .and_then(|m| m.with_body_ids(vec![0, 0, 1, 1]))
        .unwrap()
}
