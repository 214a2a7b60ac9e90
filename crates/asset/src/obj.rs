//! OBJ decoder: positions, normals, texture coordinates, smoothing groups.
//! Texture V is flipped for top-left UV origin; tangents are accumulated per triangle.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use glam::{Vec2, Vec3};

use crate::mesh::{MeshData, MeshVertex};

/// Load an OBJ mesh from a file path.
pub fn load_obj_from_path(path: impl AsRef<Path>) -> Result<MeshData> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open OBJ file: {}", path.display()))?;
    parse_obj(BufReader::new(file)).with_context(|| format!("Malformed OBJ: {}", path.display()))
}

/// Load an OBJ mesh from a [`BufRead`] implementation.
pub fn load_obj_from_reader<R: BufRead>(reader: R) -> Result<MeshData> {
    parse_obj(reader)
}

/// Convenience helper to parse an OBJ string literal.
pub fn load_obj_from_str(contents: &str) -> Result<MeshData> {
    parse_obj(io::Cursor::new(contents))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct Corner(usize, Option<usize>, Option<usize>);

fn parse_obj<R: BufRead>(reader: R) -> Result<MeshData> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut texcoords: Vec<[f32; 2]> = Vec::new();
    let mut smooth_shading = true;

    let mut unique: HashMap<Corner, u32> = HashMap::new();
    let mut vertices: Vec<MeshVertex> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", line_no + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut parts = trimmed.split_whitespace();
        let tag = parts
            .next()
            .ok_or_else(|| anyhow!("Malformed OBJ line {}: '{}'", line_no + 1, trimmed))?;

        match tag {
            "v" => {
                let x = parse_f32(parts.next(), line_no, "x coordinate")?;
                let y = parse_f32(parts.next(), line_no, "y coordinate")?;
                let z = parse_f32(parts.next(), line_no, "z coordinate")?;
                positions.push([x, y, z]);
            }
            "vt" => {
                let u = parse_f32(parts.next(), line_no, "u coordinate")?;
                let v = parse_f32(parts.next(), line_no, "v coordinate")?;
                texcoords.push([u, 1.0 - v]);
            }
            "vn" => {
                let nx = parse_f32(parts.next(), line_no, "nx coordinate")?;
                let ny = parse_f32(parts.next(), line_no, "ny coordinate")?;
                let nz = parse_f32(parts.next(), line_no, "nz coordinate")?;
                normals.push([nx, ny, nz]);
            }
            "s" => {
                smooth_shading = !matches!(parts.next(), Some("off") | Some("0"));
            }
            "f" => {
                let mut face: Vec<u32> = Vec::new();
                for part in parts {
                    let corner = parse_face_vertex(
                        part,
                        positions.len(),
                        texcoords.len(),
                        normals.len(),
                        line_no,
                    )?;
                    let index = match unique.get(&corner) {
                        Some(&idx) => idx,
                        None => {
                            let Corner(vi, vti, vni) = corner;
                            let uv = vti.map(|i| texcoords[i]).unwrap_or([0.0, 0.0]);
                            let normal = vni.map(|i| normals[i]).unwrap_or([0.0, 0.0, 1.0]);

                            let idx = u32::try_from(vertices.len())
                                .map_err(|_| anyhow!("Too many vertices in OBJ (>{})", u32::MAX))?;
                            vertices.push(MeshVertex::new(positions[vi], normal, uv));
                            unique.insert(corner, idx);
                            idx
                        }
                    };
                    face.push(index);
                }

                if face.len() < 3 {
                    log::warn!("Skipping degenerate face on line {}", line_no + 1);
                    continue;
                }
                // Triangulate fan
                for tri in 1..(face.len() - 1) {
                    indices.extend_from_slice(&[face[0], face[tri], face[tri + 1]]);
                }
            }
            "o" | "g" | "mtllib" | "usemtl" | "l" | "p" => {}
            other => {
                log::debug!("Ignoring OBJ directive '{}' on line {}", other, line_no + 1);
            }
        }
    }

    if vertices.is_empty() || indices.is_empty() {
        anyhow::bail!("OBJ contained no triangles");
    }

    accumulate_tangents(&mut vertices, &indices);

    let mut mesh = MeshData::new(vertices, indices);
    mesh.smooth_shading = smooth_shading;
    Ok(mesh)
}

/// Sums per-triangle tangents into each corner, then normalizes.
fn accumulate_tangents(vertices: &mut [MeshVertex], indices: &[u32]) {
    let mut sums = vec![Vec3::ZERO; vertices.len()];

    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let (p0, p1, p2) = (
            Vec3::from(vertices[a].position),
            Vec3::from(vertices[b].position),
            Vec3::from(vertices[c].position),
        );
        let (uv0, uv1, uv2) = (
            Vec2::from(vertices[a].uv),
            Vec2::from(vertices[b].uv),
            Vec2::from(vertices[c].uv),
        );

        let (dp1, dp2) = (p1 - p0, p2 - p0);
        let (duv1, duv2) = (uv1 - uv0, uv2 - uv0);
        let det = duv1.x * duv2.y - duv1.y * duv2.x;
        if det.abs() < f32::EPSILON {
            continue;
        }
        let tangent = (dp1 * duv2.y - dp2 * duv1.y) / det;
        for i in [a, b, c] {
            sums[i] += tangent;
        }
    }

    for (vertex, sum) in vertices.iter_mut().zip(sums) {
        vertex.tangent = sum.normalize_or_zero().to_array();
    }
}

fn parse_f32(value: Option<&str>, line_no: usize, what: &str) -> Result<f32> {
    let token = value.ok_or_else(|| anyhow!("Missing {} on line {}", what, line_no + 1))?;
    token
        .parse::<f32>()
        .with_context(|| format!("Failed to parse {} on line {}", what, line_no + 1))
}

fn parse_face_vertex(
    token: &str,
    pos_count: usize,
    tex_count: usize,
    norm_count: usize,
    line_no: usize,
) -> Result<Corner> {
    let mut split = token.split('/');
    let pos = split
        .next()
        .ok_or_else(|| anyhow!("Malformed face element '{}' on line {}", token, line_no + 1))?;
    let pos_idx = resolve_index(pos, pos_count, line_no)?;

    let tex_idx = match split.next() {
        Some(value) if !value.is_empty() => Some(resolve_index(value, tex_count, line_no)?),
        _ => None,
    };

    let norm_idx = match split.next() {
        Some(value) if !value.is_empty() => Some(resolve_index(value, norm_count, line_no)?),
        _ => None,
    };

    Ok(Corner(pos_idx, tex_idx, norm_idx))
}

fn resolve_index(token: &str, len: usize, line_no: usize) -> Result<usize> {
    let raw = token
        .parse::<i64>()
        .with_context(|| format!("Invalid index '{}' on line {}", token, line_no + 1))?;
    if raw == 0 {
        anyhow::bail!("OBJ indices are 1-based; found 0 on line {}", line_no + 1);
    }

    // Negative indices are relative to the end of the list read so far.
    let idx = if raw > 0 { raw - 1 } else { len as i64 + raw };

    if idx < 0 || idx as usize >= len {
        anyhow::bail!(
            "OBJ index {} resolved out of bounds (len={}) on line {}",
            raw,
            len,
            line_no + 1
        );
    }

    Ok(idx as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"
        v 0.0 0.0 0.0
        v 1.0 0.0 0.0
        v 0.0 1.0 0.0
        vn 0.0 0.0 1.0
        vt 0.0 0.0
        vt 1.0 0.0
        vt 0.0 1.0
        f 1/1/1 2/2/1 3/3/1
    "#;

    #[test]
    fn parse_simple_triangle() {
        let mesh = load_obj_from_str(TRIANGLE).expect("parse triangle");
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices.len(), 3);
        assert!(mesh.is_valid());
        assert!(mesh.smooth_shading);
    }

    #[test]
    fn texture_v_is_flipped() {
        let mesh = load_obj_from_str(TRIANGLE).unwrap();
        assert_eq!(mesh.vertices[0].uv, [0.0, 1.0]);
        assert_eq!(mesh.vertices[2].uv, [0.0, 0.0]);
    }

    #[test]
    fn tangents_follow_u_axis() {
        let mesh = load_obj_from_str(TRIANGLE).unwrap();
        for v in &mesh.vertices {
            let t = Vec3::from(v.tangent);
            assert!((t - Vec3::X).length() < 1e-5, "tangent was {t:?}");
        }
    }

    #[test]
    fn quad_is_fan_triangulated_and_shares_corners() {
        let src = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\ns off\nf 1 2 3 4\n";
        let mesh = load_obj_from_str(src).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert!(!mesh.smooth_shading);
    }

    #[test]
    fn negative_indices_are_relative() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let mesh = load_obj_from_str(src).unwrap();
        assert_eq!(mesh.indices.len(), 3);
    }

    #[test]
    fn rejects_out_of_range_index() {
        let err = load_obj_from_str("v 0 0 0\nf 1 2 3\n").unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn rejects_file_without_faces() {
        assert!(load_obj_from_str("v 0 0 0\n").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_obj_from_path("/definitely/not/here.obj").unwrap_err();
        assert!(format!("{err:#}").contains("here.obj"));
    }
}
