//! OBJ file loader for 3D models
//!
//! Faces are fan-triangulated and every face corner becomes its own vertex.
//! Tangents and binormals are derived per triangle from the texture
//! coordinate gradients.

use nalgebra::{Vector2, Vector3};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use scene_renderer::MeshData;

use super::AssetError;

/// Load an OBJ file
pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<MeshData, AssetError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mesh = parse_obj(BufReader::new(file))?;
    log::info!(
        "Loaded {} ({} vertices, {} triangles)",
        path.display(),
        mesh.vertex_count(),
        mesh.indices.len() / 3
    );
    Ok(mesh)
}

fn parse_floats<const N: usize>(parts: &[&str], line: usize, what: &str) -> Result<[f32; N], AssetError> {
    let mut out = [0.0; N];
    for (i, slot) in out.iter_mut().enumerate() {
        let token = parts.get(i).ok_or_else(|| AssetError::Parse {
            line,
            reason: format!("{what} needs {N} components"),
        })?;
        *slot = token.parse().map_err(|_| AssetError::Parse {
            line,
            reason: format!("invalid {what} component '{token}'"),
        })?;
    }
    Ok(out)
}

/// Resolve a 1-based (or negative, relative) OBJ index against `len` entries
fn resolve_index(token: &str, len: usize, line: usize) -> Result<usize, AssetError> {
    let raw: i64 = token.parse().map_err(|_| AssetError::Parse {
        line,
        reason: format!("invalid index '{token}'"),
    })?;
    let resolved = if raw < 0 { len as i64 + raw } else { raw - 1 };
    usize::try_from(resolved)
        .ok()
        .filter(|&index| index < len)
        .ok_or_else(|| AssetError::Parse {
            line,
            reason: format!("index {raw} out of range"),
        })
}

#[derive(Clone, Copy)]
struct Corner {
    position: usize,
    texcoord: Option<usize>,
    normal: Option<usize>,
}

/// Parse OBJ text
pub fn parse_obj<R: BufRead>(reader: R) -> Result<MeshData, AssetError> {
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut texcoords: Vec<[f32; 2]> = Vec::new();
    let mut triangles: Vec<[Corner; 3]> = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line_number = number + 1;
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&keyword, rest)) = parts.split_first() else {
            continue;
        };

        match keyword {
            "v" => positions.push(parse_floats(rest, line_number, "position")?),
            "vn" => normals.push(parse_floats(rest, line_number, "normal")?),
            "vt" => texcoords.push(parse_floats(rest, line_number, "texture coordinate")?),
            "f" => {
                if rest.len() < 3 {
                    return Err(AssetError::Parse {
                        line: line_number,
                        reason: "face needs at least 3 vertices".to_string(),
                    });
                }
                let corners = rest
                    .iter()
                    .map(|corner| {
                        let mut fields = corner.split('/');
                        let position = resolve_index(fields.next().unwrap_or(""), positions.len(), line_number)?;
                        let texcoord = match fields.next() {
                            Some(t) if !t.is_empty() => Some(resolve_index(t, texcoords.len(), line_number)?),
                            _ => None,
                        };
                        let normal = match fields.next() {
                            Some(n) if !n.is_empty() => Some(resolve_index(n, normals.len(), line_number)?),
                            _ => None,
                        };
                        Ok(Corner {
                            position,
                            texcoord,
                            normal,
                        })
                    })
                    .collect::<Result<Vec<_>, AssetError>>()?;

                for i in 1..corners.len() - 1 {
                    triangles.push([corners[0], corners[i], corners[i + 1]]);
                }
            }
            _ => {}
        }
    }

    if triangles.is_empty() {
        return Err(AssetError::InvalidFormat("No faces found in OBJ file".to_string()));
    }

    let mut mesh = MeshData {
        positions: Vec::with_capacity(triangles.len() * 3),
        normals: Vec::with_capacity(triangles.len() * 3),
        tangents: Vec::with_capacity(triangles.len() * 3),
        binormals: Vec::with_capacity(triangles.len() * 3),
        texcoords: Vec::with_capacity(triangles.len() * 3),
        indices: Vec::with_capacity(triangles.len() * 3),
    };

    for triangle in &triangles {
        let p: [Vector3<f32>; 3] = triangle.map(|c| Vector3::from(positions[c.position]));
        let uv: [Vector2<f32>; 3] = triangle.map(|c| Vector2::from(c.texcoord.map_or([0.0, 0.0], |t| texcoords[t])));
        let face_normal = (p[1] - p[0]).cross(&(p[2] - p[0])).try_normalize(f32::EPSILON).unwrap_or_else(Vector3::y);
        let (tangent, binormal) = tangent_frame(&p, &uv, &face_normal);

        for (corner, (position, texcoord)) in triangle.iter().zip(p.iter().zip(uv.iter())) {
            let normal = corner.normal.map_or(face_normal, |n| Vector3::from(normals[n]));
            mesh.indices.push(mesh.positions.len() as u32);
            mesh.positions.push((*position).into());
            mesh.normals.push(normal.into());
            mesh.tangents.push(tangent.into());
            mesh.binormals.push(binormal.into());
            mesh.texcoords.push((*texcoord).into());
        }
    }

    Ok(mesh)
}

/// Tangent and binormal spanning the triangle's texture space
///
/// Degenerate texture coordinates fall back to any frame orthogonal to `normal`.
pub fn tangent_frame(
    p: &[Vector3<f32>; 3],
    uv: &[Vector2<f32>; 3],
    normal: &Vector3<f32>,
) -> (Vector3<f32>, Vector3<f32>) {
    let edge1 = p[1] - p[0];
    let edge2 = p[2] - p[0];
    let duv1 = uv[1] - uv[0];
    let duv2 = uv[2] - uv[0];

    let det = duv1.x * duv2.y - duv2.x * duv1.y;
    if det.abs() > f32::EPSILON {
        let r = 1.0 / det;
        let tangent = (edge1 * duv2.y - edge2 * duv1.y) * r;
        let binormal = (edge2 * duv1.x - edge1 * duv2.x) * r;
        if let (Some(t), Some(b)) = (tangent.try_normalize(f32::EPSILON), binormal.try_normalize(f32::EPSILON)) {
            return (t, b);
        }
    }

    let helper = if normal.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    let tangent = helper.cross(normal).normalize();
    let binormal = normal.cross(&tangent);
    (tangent, binormal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const QUAD: &str = "\
# unit quad in the xz plane
v 0 0 0
v 1 0 0
v 1 0 1
v 0 0 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 1 0
f 1/1/1 4/4/1 3/3/1 2/2/1
";

    #[test]
    fn test_quad_is_fan_triangulated() {
        let mesh = parse_obj(QUAD.as_bytes()).unwrap();
        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.vertex_count(), 6);
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.normals[0], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_tangents_follow_texture_axes() {
        let mesh = parse_obj(QUAD.as_bytes()).unwrap();
        let tangent = Vector3::from(mesh.tangents[0]);
        let binormal = Vector3::from(mesh.binormals[0]);
        assert_relative_eq!(tangent, Vector3::x(), epsilon = 1e-5);
        assert_relative_eq!(binormal, Vector3::z(), epsilon = 1e-5);
    }

    #[test]
    fn test_missing_normals_use_face_normal() {
        let mesh = parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".as_bytes()).unwrap();
        assert_relative_eq!(Vector3::from(mesh.normals[0]), Vector3::z(), epsilon = 1e-5);
        assert_eq!(mesh.texcoords[0], [0.0, 0.0]);
    }

    #[test]
    fn test_negative_indices_are_relative() {
        let mesh = parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n".as_bytes()).unwrap();
        assert_eq!(mesh.positions[1], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_out_of_range_index_reports_line() {
        let err = parse_obj("v 0 0 0\nf 1 2 3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AssetError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_no_faces_is_invalid() {
        assert!(matches!(
            parse_obj("v 0 0 0\n".as_bytes()),
            Err(AssetError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_degenerate_uvs_still_give_orthogonal_frame() {
        let p = [Vector3::zeros(), Vector3::x(), Vector3::z()];
        let uv = [Vector2::zeros(); 3];
        let normal = Vector3::y();
        let (t, b) = tangent_frame(&p, &uv, &normal);
        assert_relative_eq!(t.dot(&normal), 0.0, epsilon = 1e-5);
        assert_relative_eq!(b.dot(&normal), 0.0, epsilon = 1e-5);
        assert_relative_eq!(t.norm(), 1.0, epsilon = 1e-5);
    }
}
