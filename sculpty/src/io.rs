//! Mesh snapshots in OBJ and MEDIT formats.
//!
//! OBJ output goes through `geo`. MEDIT is read and written here since `geo`
//! has no MEDIT support.
//!
//! MEDIT files carry body ids as cell references and facet tags as
//! references of the facet entries, so a written mesh reads back complete.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::basis::ElementKind;
use crate::mesh::Mesh;
use crate::Error;

fn cell_keyword(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Triangle => "Triangles",
        ElementKind::Quad => "Quadrilaterals",
        ElementKind::Tetrahedron => "Tetrahedra",
        ElementKind::Hexahedron => "Hexahedra",
    }
}

fn facet_keyword(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Triangle | ElementKind::Quad => "Edges",
        ElementKind::Tetrahedron => "Triangles",
        ElementKind::Hexahedron => "Quadrilaterals",
    }
}

/// Surface of the mesh as a polygon mesh. Planar meshes get a zero z coordinate.
pub fn to_polymesh(mesh: &Mesh) -> geo::mesh::PolyMesh<f64> {
    let verts: Vec<[f64; 3]> = mesh
        .vertices
        .chunks_exact(mesh.dim)
        .map(|v| [v[0], v[1], if mesh.dim == 3 { v[2] } else { 0.0 }])
        .collect();
    // Volume meshes are written through their boundary.
    let faces = if mesh.dim == 2 {
        mesh.cell_iter().map(|c| c.to_vec()).collect()
    } else {
        mesh.boundary_facets()
    };
    let mut indices = Vec::new();
    for f in faces {
        indices.push(f.len());
        indices.extend(f);
    }
    geo::mesh::PolyMesh::new(verts, &indices)
}

/// Writes the mesh surface as a Wavefront OBJ file.
pub fn write_obj(mesh: &Mesh, path: impl AsRef<Path>) -> Result<(), Error> {
    geo::io::save_polymesh(&to_polymesh(mesh), path.as_ref())?;
    Ok(())
}

pub fn write_medit_to<W: Write>(mesh: &Mesh, mut w: W) -> Result<(), Error> {
    writeln!(w, "MeshVersionFormatted 2")?;
    writeln!(w, "Dimension {}", mesh.dim)?;
    writeln!(w, "Vertices")?;
    writeln!(w, "{}", mesh.num_vertices())?;
    for v in mesh.vertices.chunks_exact(mesh.dim) {
        for x in v {
            write!(w, "{} ", x)?;
        }
        writeln!(w, "0")?;
    }

    writeln!(w, "{}", cell_keyword(mesh.kind))?;
    writeln!(w, "{}", mesh.num_cells())?;
    for (cell, body) in mesh.cell_iter().zip(mesh.body_ids.iter()) {
        for v in cell {
            write!(w, "{} ", v + 1)?;
        }
        writeln!(w, "{}", body)?;
    }

    let mut tagged: Vec<(&Vec<usize>, i32)> = mesh.facet_tags.iter().map(|(k, &t)| (k, t)).collect();
    tagged.sort();
    if !tagged.is_empty() {
        let boundary = mesh.boundary_facets();
        writeln!(w, "{}", facet_keyword(mesh.kind))?;
        writeln!(w, "{}", tagged.len())?;
        for (key, tag) in tagged {
            // Prefer the oriented boundary facet, falling back to the sorted key.
            let facet = boundary
                .iter()
                .find(|f| {
                    let mut s = f.to_vec();
                    s.sort_unstable();
                    &s == key
                })
                .unwrap_or(key);
            for v in facet {
                write!(w, "{} ", v + 1)?;
            }
            writeln!(w, "{}", tag)?;
        }
    }
    writeln!(w, "End")?;
    Ok(())
}

pub fn write_medit(mesh: &Mesh, path: impl AsRef<Path>) -> Result<(), Error> {
    let mut f = BufWriter::new(File::create(path)?);
    write_medit_to(mesh, &mut f)?;
    f.flush()?;
    Ok(())
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedMesh {
        reason: reason.into(),
    }
}

struct Tokens<'a> {
    iter: std::iter::Peekable<std::str::SplitWhitespace<'a>>,
}

impl<'a> Tokens<'a> {
    fn next_str(&mut self) -> Option<&'a str> {
        self.iter.next()
    }

    fn next<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, Error> {
        let tok = self
            .iter
            .next()
            .ok_or_else(|| malformed(format!("unexpected end of file reading {}", what)))?;
        tok.parse()
            .map_err(|_| malformed(format!("invalid {}: {:?}", what, tok)))
    }
}

/// Parses a MEDIT mesh with one cell kind.
pub fn parse_medit(text: &str) -> Result<Mesh, Error> {
    let stripped: String = text
        .lines()
        .map(|l| l.split('#').next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");
    let mut tokens = Tokens {
        iter: stripped.split_whitespace().peekable(),
    };

    let mut dim = 0;
    let mut vertices = Vec::new();
    // (keyword, nodes per entry, flat nodes, refs)
    let mut sections: Vec<(String, Vec<usize>, Vec<i64>)> = Vec::new();

    while let Some(keyword) = tokens.next_str() {
        let entry_size = match keyword {
            "MeshVersionFormatted" => {
                let _: u32 = tokens.next("version")?;
                continue;
            }
            "Dimension" => {
                dim = tokens.next("dimension")?;
                continue;
            }
            "Vertices" => {
                if dim == 0 {
                    return Err(malformed("vertices before dimension"));
                }
                let n: usize = tokens.next("vertex count")?;
                vertices.reserve(n * dim);
                for _ in 0..n {
                    for _ in 0..dim {
                        vertices.push(tokens.next::<f64>("coordinate")?);
                    }
                    let _: i64 = tokens.next("vertex reference")?;
                }
                continue;
            }
            "End" => break,
            "Edges" => 2,
            "Triangles" => 3,
            "Quadrilaterals" | "Tetrahedra" => 4,
            "Hexahedra" => 8,
            other => return Err(malformed(format!("unsupported section {}", other))),
        };
        let n: usize = tokens.next("element count")?;
        let mut nodes = Vec::with_capacity(n * entry_size);
        let mut refs = Vec::with_capacity(n);
        for _ in 0..n {
            for _ in 0..entry_size {
                let v: usize = tokens.next("element node")?;
                if v == 0 {
                    return Err(malformed("node indices are one based"));
                }
                nodes.push(v - 1);
            }
            refs.push(tokens.next("element reference")?);
        }
        sections.push((keyword.to_string(), nodes, refs));
    }

    let kind = match dim {
        2 if sections.iter().any(|s| s.0 == "Quadrilaterals") => ElementKind::Quad,
        2 => ElementKind::Triangle,
        3 if sections.iter().any(|s| s.0 == "Hexahedra") => ElementKind::Hexahedron,
        3 => ElementKind::Tetrahedron,
        d => return Err(Error::UnsupportedDimension { dim: d }),
    };

    let (cells, body_refs) = sections
        .iter()
        .find(|s| s.0 == cell_keyword(kind))
        .map(|s| (s.1.clone(), s.2.clone()))
        .ok_or_else(|| malformed("no cells"))?;
    let body_ids = body_refs
        .into_iter()
        .map(|r| usize::try_from(r).map_err(|_| malformed("negative body id")))
        .collect::<Result<Vec<_>, _>>()?;

    let mut mesh = Mesh::new(kind, vertices, cells)?.with_body_ids(body_ids)?;
    let facet_size = kind.facets()[0].len();
    if let Some((_, nodes, refs)) = sections.iter().find(|s| s.0 == facet_keyword(kind)) {
        for (facet, &tag) in nodes.chunks_exact(facet_size).zip(refs.iter()) {
            let tag = i32::try_from(tag).map_err(|_| malformed("facet tag out of range"))?;
            mesh.tag_facet(facet, tag);
        }
    }
    Ok(mesh)
}

pub fn read_medit(path: impl AsRef<Path>) -> Result<Mesh, Error> {
    let text = std::fs::read_to_string(path)?;
    parse_medit(&text)
}
