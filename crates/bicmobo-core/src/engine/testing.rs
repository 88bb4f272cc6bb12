//! Stand-in toolchain for engine tests: tiny shell scripts in place of the simulation,
//! reconstruction and objective executables, plus a matching configuration.

use crate::core::config::models::{
    CompactTarget, Config, ConvergenceConfig, DetectorConfig, Domain, InputKind, ObjectiveConfig,
    ObjectiveSpec, OptimizerConfig, ParameterConfig, ParameterSpec, ParameterTarget,
    ProblemConfig, ResultSource, RunConfig, SimInput, Timeouts,
};
use crate::core::models::objective::Direction;
use crate::core::models::stage::Stage;
use crate::core::utils::template::CommandTemplate;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub const OBJECTIVE: &str = "ElectronEnergyResolution";
pub const LABEL: &str = "single_electron";
pub const STEERING: &str = "central.e5ele.py";

pub const SIM_OK: &str = r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outputFile) out="$2"; shift ;;
  esac
  shift
done
echo "simulated $DETECTOR_CONFIG" > "$out"
"#;

pub const REC_OK: &str = r#"out=""
for arg in "$@"; do
  case "$arg" in
    -Ppodio:output_file=*) out="${arg#-Ppodio:output_file=}" ;;
  esac
done
echo "reconstructed $*" > "$out"
"#;

pub const REC_FAIL: &str = "echo 'podio: cannot open input' >&2\nexit 1\n";

pub const OBJECTIVE_OK: &str = "echo 'Fitting resolution'\necho 0.042\n";

pub const OBJECTIVE_GARBAGE: &str = "echo 'resolution: not-a-number'\n";

const BIC_XML: &str = r#"<lccdd>
  <define>
    <constant name="EcalBarrel_Thickness" value="40*cm"/>
  </define>
</lccdd>
"#;

const CONFIG_XML: &str = r#"<lccdd>
  <include ref="${DETECTOR_PATH}/compact/ecal/bic.xml"/>
</lccdd>
"#;

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A temporary installation with one gun input, one geometry and one reconstruction
/// parameter, and one objective.
pub struct Pipeline {
    pub dir: TempDir,
    pub config: Config,
}

impl Pipeline {
    pub fn new(sim: &str, rec: &str, objective: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let bin = root.join("bin");
        let detector = root.join("detector");
        let steering = root.join("steering");
        fs::create_dir_all(&bin).unwrap();
        fs::create_dir_all(detector.join("compact/ecal")).unwrap();
        fs::create_dir_all(&steering).unwrap();
        fs::write(detector.join("compact/ecal/bic.xml"), BIC_XML).unwrap();
        fs::write(detector.join("epic_craterlake.xml"), CONFIG_XML).unwrap();
        fs::write(steering.join(STEERING), "# gun steering\n").unwrap();

        let run = RunConfig {
            run_path: root.join("run"),
            out_path: root.join("out"),
            log_path: root.join("log"),
            sim_exec: write_script(&bin, "npsim", sim),
            rec_exec: write_script(&bin, "eicrecon", rec),
            detector: DetectorConfig {
                name: "epic".into(),
                version: Some("25.05.0".into()),
                path: detector,
                config: "epic_craterlake".into(),
                install: None,
                library_paths: vec![],
            },
            sim_inputs: BTreeMap::from([(
                LABEL.to_string(),
                SimInput {
                    kind: InputKind::Gun,
                    location: steering,
                    steering: vec![STEERING.to_string()],
                    events: Some(10),
                },
            )]),
            rec_collections: vec!["EcalBarrelClusters".into()],
            timeouts: Timeouts {
                simulation: Duration::from_secs(20),
                reconstruction: Duration::from_secs(20),
                objective: Duration::from_secs(20),
            },
            retries: 0,
            extra_env: BTreeMap::new(),
            write_scripts: true,
            setup_script: None,
        };

        let problem = ProblemConfig {
            name: "bic_test".into(),
            out_path: root.join("state"),
            max_trials: 1,
            batch_size: 1,
            max_concurrency: 2,
            max_consecutive_failures: 5,
            run_timeout: None,
            optimizer: OptimizerConfig::Random {
                seed: Some(7),
                convergence: ConvergenceConfig {
                    improvement_threshold: 0.0,
                    patience: 0,
                },
            },
        };

        let parameters = ParameterConfig {
            parameters: vec![
                ParameterSpec {
                    name: "enable_staves_2".into(),
                    domain: Domain::Int { min: 0, max: 1 },
                    target: ParameterTarget::Reconstruction {
                        path: "BEMC:EcalBarrelImagingRawHits:enable_staves_2".into(),
                        units: None,
                    },
                },
                ParameterSpec {
                    name: "thickness".into(),
                    domain: Domain::Float { min: 30.0, max: 50.0 },
                    target: ParameterTarget::Geometry(CompactTarget {
                        compact: PathBuf::from("compact/ecal/bic.xml"),
                        element: "constant".into(),
                        name: "EcalBarrel_Thickness".into(),
                        attribute: "value".into(),
                        units: Some("cm".into()),
                    }),
                },
            ],
        };

        let objectives = ObjectiveConfig {
            objectives: vec![ObjectiveSpec {
                name: OBJECTIVE.into(),
                input: LABEL.into(),
                executable: write_script(&bin, "resolution.sh", objective),
                rule: CommandTemplate::parse("{exec} {input} {output} {flag}").unwrap(),
                flag: Some("11".into()),
                stage: Stage::Reconstruction,
                direction: Direction::Minimize,
                source: ResultSource::Stdout,
            }],
        };

        for d in [&run.run_path, &run.out_path, &run.log_path, &problem.out_path] {
            fs::create_dir_all(d).unwrap();
        }

        Self {
            dir,
            config: Config {
                run,
                problem,
                parameters,
                objectives,
            },
        }
    }

    pub fn happy() -> Self {
        Self::new(SIM_OK, REC_OK, OBJECTIVE_OK)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}
