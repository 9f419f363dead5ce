//! Process configuration files (YAML).
//!
//! ```yaml
//! zoom_levels: [0, 10]          # or 5, or {min: 0, max: 10}
//! pyramid:
//!   grid: geodetic              # mercator, or {shape, bounds, is_global, epsg}
//!   metatiling: 2
//!   pixelbuffer: 0
//! bounds: [-10, 40, 10, 60]     # optional, defaults to the grid bounds
//! input:
//!   dem: dem.png                # raster file, or another process file (*.yaml)
//!   other: {path: other.png, crs: "EPSG:3857", nodata: 0}
//! output:
//!   format: PNG
//!   path: out
//!   metatiling: 1               # optional, at most the process metatiling
//! params: {}                    # passed to the process function
//! ```
//!
//! Relative paths resolve against the directory of the process file.

use pyramid_common::{BoundingBox, CrsCode, GridDefinition, TilePyramid, MAX_ZOOM};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use storage::Scheme;

use crate::{ProcessError, Result};

// ============================================================================
// Raw YAML layout
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ZoomLevelsConfig {
    Single(u32),
    Pair(Vec<u32>),
    Range { min: u32, max: u32 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum GridConfig {
    Named(String),
    Custom {
        shape: [u32; 2],
        bounds: [f64; 4],
        #[serde(default)]
        is_global: bool,
        epsg: u32,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct PyramidConfig {
    grid: GridConfig,
    #[serde(default = "default_metatiling")]
    metatiling: u32,
    #[serde(default)]
    pixelbuffer: u32,
}

fn default_metatiling() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum InputConfig {
    Path(String),
    Raster {
        path: String,
        #[serde(default)]
        crs: Option<CrsCode>,
        #[serde(default)]
        nodata: Option<f32>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct RawProcessConfig {
    zoom_levels: ZoomLevelsConfig,
    pyramid: PyramidConfig,
    #[serde(default)]
    bounds: Option<Vec<f64>>,
    #[serde(default)]
    input: BTreeMap<String, InputConfig>,
    output: Map<String, Value>,
    #[serde(default)]
    params: Map<String, Value>,
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Inclusive zoom level range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomRange {
    pub min: u32,
    pub max: u32,
}

impl ZoomRange {
    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min > max {
            return Err(ProcessError::config(format!(
                "zoom_levels min {} is greater than max {}",
                min, max
            )));
        }
        if max > MAX_ZOOM {
            return Err(ProcessError::config(format!(
                "zoom_levels max {} exceeds the deepest zoom {}",
                max, MAX_ZOOM
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, zoom: u32) -> bool {
        (self.min..=self.max).contains(&zoom)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.min..=self.max
    }
}

impl TryFrom<ZoomLevelsConfig> for ZoomRange {
    type Error = ProcessError;

    fn try_from(config: ZoomLevelsConfig) -> Result<Self> {
        match config {
            ZoomLevelsConfig::Single(zoom) => ZoomRange::new(zoom, zoom),
            ZoomLevelsConfig::Range { min, max } => ZoomRange::new(min, max),
            ZoomLevelsConfig::Pair(values) => match values.as_slice() {
                &[zoom] => ZoomRange::new(zoom, zoom),
                &[a, b] => ZoomRange::new(a.min(b), a.max(b)),
                _ => Err(ProcessError::config(format!(
                    "zoom_levels needs one or two values, got {}",
                    values.len()
                ))),
            },
        }
    }
}

/// A configured process input.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSpec {
    /// A georeferenced raster file. Without `crs`, the process CRS is assumed.
    RasterFile {
        path: String,
        crs: Option<CrsCode>,
        nodata: Option<f32>,
    },
    /// Output of another process, opened read-only.
    ProcessFile(PathBuf),
}

impl InputSpec {
    pub fn path(&self) -> String {
        match self {
            Self::RasterFile { path, .. } => path.clone(),
            Self::ProcessFile(path) => path.to_string_lossy().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Process name, the file stem of the process file.
    pub name: String,
    pub zoom_levels: ZoomRange,
    pub process_pyramid: TilePyramid,
    pub output_pyramid: TilePyramid,
    pub bounds: BoundingBox,
    pub inputs: BTreeMap<String, InputSpec>,
    /// Output driver configuration with a resolved `path`.
    pub output: Map<String, Value>,
    pub params: Map<String, Value>,
}

impl ProcessConfig {
    /// Load a process file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ProcessError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("process")
            .to_string();
        Self::from_yaml(&contents, &name, path.parent())
    }

    /// Parse a process definition. Relative paths resolve against `base_dir`
    /// when given.
    pub fn from_yaml(contents: &str, name: &str, base_dir: Option<&Path>) -> Result<Self> {
        let raw: RawProcessConfig = serde_yaml::from_str(contents)?;
        let zoom_levels = ZoomRange::try_from(raw.zoom_levels)?;

        let grid = match raw.pyramid.grid {
            GridConfig::Named(name) => GridDefinition::from_name(&name)?,
            GridConfig::Custom {
                shape,
                bounds,
                is_global,
                epsg,
            } => GridDefinition::custom(
                (shape[0], shape[1]),
                BoundingBox::from_slice(&bounds)?,
                is_global,
                CrsCode::from_epsg(epsg),
            )?,
        };
        let process_pyramid =
            TilePyramid::new(grid.clone(), raw.pyramid.metatiling, raw.pyramid.pixelbuffer)?;

        let bounds = match raw.bounds {
            Some(values) => BoundingBox::from_slice(&values)?,
            None => grid.bounds,
        };

        let mut output = raw.output;
        let output_metatiling = take_u32(&mut output, "metatiling")?.unwrap_or(process_pyramid.metatiling);
        if output_metatiling > process_pyramid.metatiling {
            return Err(ProcessError::config(format!(
                "output metatiling ({}) must not be greater than process metatiling ({})",
                output_metatiling, process_pyramid.metatiling
            )));
        }
        let output_pixelbuffer = take_u32(&mut output, "pixelbuffer")?.unwrap_or(0);
        let output_pyramid = TilePyramid::new(grid, output_metatiling, output_pixelbuffer)?;

        match output.get("path") {
            Some(Value::String(path)) => {
                let resolved = resolve_path(path, base_dir);
                output.insert("path".to_string(), Value::String(resolved));
            }
            Some(other) => {
                return Err(ProcessError::config(format!(
                    "output path must be a string, got {}",
                    other
                )))
            }
            None => return Err(ProcessError::config("output path is missing")),
        }

        let inputs = raw
            .input
            .into_iter()
            .map(|(name, input)| {
                let spec = match input {
                    InputConfig::Path(path) if is_process_file(&path) => {
                        InputSpec::ProcessFile(PathBuf::from(resolve_path(&path, base_dir)))
                    }
                    InputConfig::Path(path) => InputSpec::RasterFile {
                        path: resolve_path(&path, base_dir),
                        crs: None,
                        nodata: None,
                    },
                    InputConfig::Raster { path, crs, nodata } => InputSpec::RasterFile {
                        path: resolve_path(&path, base_dir),
                        crs,
                        nodata,
                    },
                };
                (name, spec)
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            zoom_levels,
            process_pyramid,
            output_pyramid,
            bounds,
            inputs,
            output,
            params: raw.params,
        })
    }

    pub fn output_path(&self) -> &str {
        self.output.get("path").and_then(Value::as_str).unwrap_or_default()
    }
}

fn take_u32(config: &mut Map<String, Value>, key: &str) -> Result<Option<u32>> {
    match config.remove(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| ProcessError::config(format!("output {} must be a non-negative integer", key))),
    }
}

fn is_process_file(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}

/// Local relative paths are joined to `base_dir`; remote URIs and absolute
/// paths are returned as is.
pub fn resolve_path(path: &str, base_dir: Option<&Path>) -> String {
    if Scheme::classify(path).is_remote() || Path::new(path).is_absolute() {
        return path.to_string();
    }
    match base_dir {
        Some(dir) => dir.join(path).to_string_lossy().to_string(),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyramid_common::GridType;

    const MINIMAL: &str = r#"
zoom_levels: [0, 5]
pyramid:
  grid: geodetic
  metatiling: 2
output:
  format: PNG
  path: out
"#;

    #[test]
    fn test_minimal_config() {
        let config = ProcessConfig::from_yaml(MINIMAL, "example", Some(Path::new("/data"))).unwrap();
        assert_eq!(config.name, "example");
        assert_eq!(config.zoom_levels, ZoomRange { min: 0, max: 5 });
        assert_eq!(config.process_pyramid.metatiling, 2);
        assert_eq!(config.output_pyramid.metatiling, 2);
        assert_eq!(config.output_pyramid.pixelbuffer, 0);
        assert_eq!(config.output_path(), "/data/out");
        assert_eq!(config.bounds, GridDefinition::geodetic().bounds);
        assert!(config.inputs.is_empty());
        assert!(!config.output.contains_key("metatiling"));
    }

    #[test]
    fn test_zoom_level_forms() {
        let single = MINIMAL.replace("[0, 5]", "7");
        let config = ProcessConfig::from_yaml(&single, "p", None).unwrap();
        assert_eq!(config.zoom_levels, ZoomRange { min: 7, max: 7 });

        let mapping = MINIMAL.replace("[0, 5]", "{min: 2, max: 4}");
        let config = ProcessConfig::from_yaml(&mapping, "p", None).unwrap();
        assert_eq!(config.zoom_levels, ZoomRange { min: 2, max: 4 });

        let inverted = MINIMAL.replace("[0, 5]", "{min: 4, max: 2}");
        assert!(ProcessConfig::from_yaml(&inverted, "p", None).unwrap_err().is_config());

        let too_deep = MINIMAL.replace("[0, 5]", "[0, 31]");
        assert!(ProcessConfig::from_yaml(&too_deep, "p", None).unwrap_err().is_config());
    }

    #[test]
    fn test_output_metatiling_bounded_by_process() {
        let finer = format!("{}  metatiling: 1\n", MINIMAL);
        let config = ProcessConfig::from_yaml(&finer, "p", None).unwrap();
        assert_eq!(config.output_pyramid.metatiling, 1);

        let coarser = format!("{}  metatiling: 4\n", MINIMAL);
        assert!(ProcessConfig::from_yaml(&coarser, "p", None).unwrap_err().is_config());
    }

    #[test]
    fn test_custom_grid() {
        let yaml = r#"
zoom_levels: 3
pyramid:
  grid:
    shape: [1, 1]
    bounds: [0, 0, 1000, 1000]
    epsg: 32633
output:
  format: PNG
  path: s3://bucket/out
"#;
        let config = ProcessConfig::from_yaml(yaml, "utm", Some(Path::new("/data"))).unwrap();
        assert_eq!(config.process_pyramid.grid.grid_type, GridType::Custom);
        assert_eq!(config.process_pyramid.crs(), CrsCode::Other(32633));
        assert_eq!(config.output_path(), "s3://bucket/out");
    }

    #[test]
    fn test_inputs() {
        let yaml = format!(
            "{}input:\n  dem: dem.png\n  upstream: ../other.yaml\n  ortho: {{path: /abs/ortho.tif, crs: \"EPSG:3857\", nodata: 0}}\n",
            MINIMAL
        );
        let config = ProcessConfig::from_yaml(&yaml, "p", Some(Path::new("/data"))).unwrap();
        assert_eq!(
            config.inputs["dem"],
            InputSpec::RasterFile {
                path: "/data/dem.png".to_string(),
                crs: None,
                nodata: None
            }
        );
        assert_eq!(
            config.inputs["upstream"],
            InputSpec::ProcessFile(PathBuf::from("/data/../other.yaml"))
        );
        assert_eq!(
            config.inputs["ortho"],
            InputSpec::RasterFile {
                path: "/abs/ortho.tif".to_string(),
                crs: Some(CrsCode::Epsg3857),
                nodata: Some(0.0)
            }
        );
    }

    #[test]
    fn test_missing_output_path() {
        let yaml = MINIMAL.replace("  path: out\n", "");
        assert!(ProcessConfig::from_yaml(&yaml, "p", None).unwrap_err().is_config());
    }
}
