//! Mesh builders shared by the unit tests.

use super::mesh::{Point, Triangle};

fn normal_of(vertices: &[Point; 3]) -> Point {
    let [a, b, c] = vertices;
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let n = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len == 0.0 {
        [0.0, 0.0, 0.0]
    } else {
        [n[0] / len, n[1] / len, n[2] / len]
    }
}

fn tri(vertices: [Point; 3]) -> Triangle {
    Triangle {
        normal: normal_of(&vertices),
        vertices,
    }
}

/// Axis-aligned cube spanning `[0, edge]` with outward winding.
pub fn cube_triangles(edge: f32) -> Vec<Triangle> {
    let s = edge;
    vec![
        tri([[0.0, 0.0, 0.0], [0.0, s, 0.0], [s, s, 0.0]]),
        tri([[0.0, 0.0, 0.0], [s, s, 0.0], [s, 0.0, 0.0]]),
        tri([[0.0, 0.0, s], [s, 0.0, s], [s, s, s]]),
        tri([[0.0, 0.0, s], [s, s, s], [0.0, s, s]]),
        tri([[0.0, 0.0, 0.0], [s, 0.0, 0.0], [s, 0.0, s]]),
        tri([[0.0, 0.0, 0.0], [s, 0.0, s], [0.0, 0.0, s]]),
        tri([[0.0, s, 0.0], [0.0, s, s], [s, s, s]]),
        tri([[0.0, s, 0.0], [s, s, s], [s, s, 0.0]]),
        tri([[0.0, 0.0, 0.0], [0.0, 0.0, s], [0.0, s, s]]),
        tri([[0.0, 0.0, 0.0], [0.0, s, s], [0.0, s, 0.0]]),
        tri([[s, 0.0, 0.0], [s, s, 0.0], [s, s, s]]),
        tri([[s, 0.0, 0.0], [s, s, s], [s, 0.0, s]]),
    ]
}

/// `count` small triangles laid out on a grid in the XY plane.
pub fn strip_triangles(count: u32) -> Vec<Triangle> {
    (0..count)
        .map(|i| {
            let x = (i % 100) as f32;
            let y = (i / 100) as f32;
            tri([[x, y, 0.0], [x + 1.0, y, 0.0], [x, y + 1.0, 1.0]])
        })
        .collect()
}

pub fn encode_binary(triangles: &[Triangle]) -> Vec<u8> {
    let mut header = [0u8; 80];
    header[..7].copy_from_slice(b"fixture");
    let mut bytes = header.to_vec();
    bytes.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
    for triangle in triangles {
        for coord in triangle.coordinates() {
            bytes.extend_from_slice(&coord.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
    }
    bytes
}

pub fn encode_ascii(triangles: &[Triangle]) -> String {
    let mut out = String::from("solid fixture\n");
    for t in triangles {
        let [nx, ny, nz] = t.normal;
        out.push_str(&format!("  facet normal {nx:e} {ny:e} {nz:e}\n    outer loop\n"));
        for [x, y, z] in t.vertices {
            out.push_str(&format!("      vertex {x:e} {y:e} {z:e}\n"));
        }
        out.push_str("    endloop\n  endfacet\n");
    }
    out.push_str("endsolid fixture\n");
    out
}

pub fn binary_cube(edge: f32) -> Vec<u8> {
    encode_binary(&cube_triangles(edge))
}

pub fn ascii_cube(edge: f32) -> String {
    encode_ascii(&cube_triangles(edge))
}

pub fn binary_mesh(count: u32) -> Vec<u8> {
    encode_binary(&strip_triangles(count))
}
