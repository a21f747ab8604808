//! Model loading and placement
//!
//! The pipeline only needs "bytes in, renderable geometry out", so loading sits
//! behind [`ModelLoader`]. [`ObjLoader`] handles the Wavefront OBJ subset the
//! renderer can use: `v` and `f` records. Everything else is ignored.

use crate::config::PlacementConfig;
use crate::error::LoadError;
use std::path::Path;

pub type Vec3 = [f32; 3];

/// Loaded geometry: vertex positions and polygon faces (0-based indices).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<Vec<usize>>,
}

impl Model {
    /// Axis-aligned bounds as `(min, max)`.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        let mut min = first;
        let mut max = first;
        for v in &self.vertices[1..] {
            for axis in 0..3 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
        }
        Some((min, max))
    }

    /// Polygon outline edges, each face closed back to its first vertex.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.faces.iter().flat_map(|face| {
            let n = face.len();
            (0..n).map(move |i| (face[i], face[(i + 1) % n]))
        })
    }

    pub fn center(&self) -> Option<Vec3> {
        let (min, max) = self.bounds()?;
        Some([
            (min[0] + max[0]) / 2.0,
            (min[1] + max[1]) / 2.0,
            (min[2] + max[2]) / 2.0,
        ])
    }
}

/// Loads a model file into geometry.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Model, LoadError>;
}

/// Wavefront OBJ loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjLoader;

impl ModelLoader for ObjLoader {
    fn load(&self, path: &Path) -> Result<Model, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_obj(path, &String::from_utf8_lossy(&bytes))
    }
}

/// Parse OBJ text. `path` is only used in error messages.
pub fn parse_obj(path: &Path, content: &str) -> Result<Model, LoadError> {
    let mut model = Model::default();
    // Faces may reference vertices declared further down, so indices are
    // range-checked once the whole file is read.
    let mut raw_faces: Vec<(usize, Vec<i64>)> = Vec::new();

    let parse_err = |line: usize, message: String| LoadError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    };

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let mut coords = [0.0f32; 3];
                for slot in coords.iter_mut() {
                    let token = tokens
                        .next()
                        .ok_or_else(|| parse_err(line_no, "vertex needs 3 coordinates".into()))?;
                    *slot = token
                        .parse::<f32>()
                        .map_err(|_| parse_err(line_no, format!("invalid coordinate '{token}'")))?;
                    if !slot.is_finite() {
                        return Err(parse_err(line_no, format!("non-finite coordinate '{token}'")));
                    }
                }
                model.vertices.push(coords);
            }
            Some("f") => {
                let mut indices = Vec::new();
                for token in tokens {
                    let position = token.split('/').next().unwrap_or("");
                    let index: i64 = position
                        .parse()
                        .map_err(|_| parse_err(line_no, format!("invalid face index '{token}'")))?;
                    let resolved = match index {
                        0 => return Err(parse_err(line_no, "face index 0".into())),
                        i if i < 0 => model.vertices.len() as i64 + i,
                        i => i - 1,
                    };
                    indices.push(resolved);
                }
                if indices.len() < 3 {
                    return Err(parse_err(line_no, "face needs at least 3 vertices".into()));
                }
                raw_faces.push((line_no, indices));
            }
            _ => {}
        }
    }

    if model.vertices.is_empty() {
        return Err(LoadError::Empty(path.to_path_buf()));
    }

    let count = model.vertices.len() as i64;
    for (line_no, indices) in raw_faces {
        let face = indices
            .into_iter()
            .map(|i| {
                if (0..count).contains(&i) {
                    Ok(i as usize)
                } else {
                    Err(parse_err(line_no, format!("face index {} out of range", i + 1)))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        model.faces.push(face);
    }

    Ok(model)
}

/// Normalize to unit size, scale, and put the model in front of the camera.
///
/// The camera sits at the origin looking down -Z.
pub fn place(model: &Model, placement: &PlacementConfig) -> Model {
    let Some((min, max)) = model.bounds() else {
        return model.clone();
    };
    let center = [
        (min[0] + max[0]) / 2.0,
        (min[1] + max[1]) / 2.0,
        (min[2] + max[2]) / 2.0,
    ];
    let size = (0..3)
        .map(|axis| max[axis] - min[axis])
        .fold(0.0f32, f32::max);
    let scale = if size > f32::EPSILON {
        placement.scale_factor / size
    } else {
        placement.scale_factor
    };
    let offset = [0.0, placement.vertical_offset, -placement.distance];

    let vertices = model
        .vertices
        .iter()
        .map(|v| {
            [
                (v[0] - center[0]) * scale + offset[0],
                (v[1] - center[1]) * scale + offset[1],
                (v[2] - center[2]) * scale + offset[2],
            ]
        })
        .collect();

    Model {
        vertices,
        faces: model.faces.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const CUBE: &str = "\
# unit cube
o cube
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 0 0 1
v 1 0 1
v 1 1 1
v 0 1 1
vn 0 0 1
f 1 2 3 4
f 5/1 6/1 7/1 8/1
f 1//1 2//1 6//1 5//1
f -1 -2 -3
";

    fn p() -> PathBuf {
        PathBuf::from("cube.obj")
    }

    #[test]
    fn parses_vertices_and_faces() {
        let model = parse_obj(&p(), CUBE).unwrap();
        assert_eq!(model.vertices.len(), 8);
        assert_eq!(model.faces.len(), 4);
        assert_eq!(model.faces[0], vec![0, 1, 2, 3]);
        assert_eq!(model.faces[3], vec![7, 6, 5]);
        assert_eq!(model.edges().count(), 4 + 4 + 4 + 3);
    }

    #[test]
    fn rejects_malformed_input() {
        let err = parse_obj(&p(), "v 1 2\n").unwrap_err();
        assert!(matches!(err, LoadError::Parse { line: 1, .. }));

        let err = parse_obj(&p(), "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 9\n").unwrap_err();
        assert!(matches!(err, LoadError::Parse { line: 4, .. }));

        let err = parse_obj(&p(), "# nothing here\n").unwrap_err();
        assert!(matches!(err, LoadError::Empty(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ObjLoader.load(Path::new("/definitely/not/here.obj")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn placement_centers_and_scales() {
        let model = parse_obj(&p(), CUBE).unwrap();
        let placement = PlacementConfig {
            scale_factor: 0.5,
            distance: 4.0,
            vertical_offset: -1.0,
        };
        let placed = place(&model, &placement);
        let (min, max) = placed.bounds().unwrap();

        assert!((max[0] - min[0] - 0.5).abs() < 1e-5);
        let center = placed.center().unwrap();
        assert!(center[0].abs() < 1e-5);
        assert!((center[1] + 1.0).abs() < 1e-5);
        assert!((center[2] + 4.0).abs() < 1e-5);
        assert_eq!(placed.faces, model.faces);
    }
}
