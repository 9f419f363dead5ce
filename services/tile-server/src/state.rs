use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use process::{Process, RunMode, TileFunction};
use pyramid_common::{CrsCode, TilePyramid};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use storage::ObjectStorageConfig;
use tracing::{info, warn};

/// A process exposed by the server together with its web pyramid.
pub struct ServedProcess {
    pub process: Arc<Process>,
    /// Process grid at metatiling 1 without pixelbuffer.
    pub web_pyramid: TilePyramid,
}

impl ServedProcess {
    pub fn new(process: Arc<Process>) -> Result<Self> {
        let web_pyramid = TilePyramid::new(process.process_pyramid().grid.clone(), 1, 0)?;
        Ok(Self {
            process,
            web_pyramid,
        })
    }

    /// Grid label used in tile URLs.
    pub fn grid_label(&self) -> &'static str {
        match self.web_pyramid.crs() {
            CrsCode::Epsg3857 => "g",
            _ => "WGS84",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        self.process.output().file_extension()
    }
}

pub struct AppState {
    pub processes: BTreeMap<String, ServedProcess>,
    /// Return failure details instead of a bare 500.
    pub debug: bool,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(processes: Vec<Arc<Process>>, debug: bool) -> Result<Self> {
        let mut served = BTreeMap::new();
        for process in processes {
            served.insert(process.name().to_string(), ServedProcess::new(process)?);
        }
        Ok(Self {
            processes: served,
            debug,
            prometheus: None,
        })
    }

    /// Open process files, keyed by file stem.
    ///
    /// Processes with a registered function run in `mode`; the others can
    /// only serve existing output and are opened read-only.
    pub async fn load(
        files: &[PathBuf],
        mode: RunMode,
        functions: &HashMap<String, Arc<dyn TileFunction>>,
        storage: ObjectStorageConfig,
        debug: bool,
    ) -> Result<Self> {
        let mut processes = Vec::with_capacity(files.len());
        for file in files {
            let config = process::ProcessConfig::from_file(file)
                .with_context(|| format!("Failed to load process file {}", file.display()))?;
            let function = functions.get(&config.name).cloned();
            let mode = match &function {
                Some(_) => mode,
                None => {
                    if mode != RunMode::Readonly {
                        warn!(process = %config.name, "No function registered, serving existing output only");
                    }
                    RunMode::Readonly
                }
            };
            let name = config.name.clone();
            let process = Process::open(config, mode, function, storage.clone())
                .await
                .with_context(|| format!("Failed to open process '{}'", name))?;
            info!(process = %name, mode = %mode, "Serving process");
            processes.push(Arc::new(process));
        }
        Self::new(processes, debug)
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
