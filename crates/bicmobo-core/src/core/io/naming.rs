use crate::core::config::models::RunConfig;
use crate::core::models::ids::TrialId;
use crate::core::models::stage::Stage;
use crate::core::models::trial::TrialArtifacts;
use std::path::{Path, PathBuf};

/// Short form of a steering file name used inside output names:
/// `central.e5ele.py` becomes `central_e5ele`.
pub fn steering_tag(steering: &str) -> String {
    steering.replace('.', "_").replace("_py", "")
}

/// Name of the file a pipeline step writes for one steering file of one input.
pub fn output_name(tag: &str, label: &str, steer_tag: &str, stage: Stage) -> String {
    let suffix = match stage {
        Stage::Simulation => ".edm4hep",
        Stage::Reconstruction => ".edm4eic",
        Stage::Analysis => "",
    };
    format!(
        "aid2e_{}.{}_{}_{}{}.root",
        stage.as_str(),
        tag,
        label,
        steer_tag,
        suffix
    )
}

/// Name of the file an objective writes for an input label.
pub fn analysis_output_name(tag: &str, label: &str, objective: &str) -> String {
    format!("aid2e_ana.{}_{}_{}.root", tag, label, objective)
}

pub fn script_name(tag: &str, label: &str, steer_tag: &str, stage: Stage) -> String {
    format!("do_aid2e_{}.{}_{}_{}.sh", stage.as_str(), tag, label, steer_tag)
}

/// Captured stdout and stderr file names for one subprocess.
pub fn log_names(stage: Stage, label: &str, detail: &str) -> (String, String) {
    let base = format!("{}.{}_{}", stage.as_str(), label, detail);
    (format!("{}.out", base), format!("{}.err", base))
}

/// Per-trial directories under the run, output and log roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialLayout {
    pub tag: String,
    pub run_dir: PathBuf,
    pub out_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl TrialLayout {
    pub fn new(run_root: &Path, out_root: &Path, log_root: &Path, id: TrialId) -> Self {
        let tag = id.tag();
        Self {
            run_dir: run_root.join(&tag),
            out_dir: out_root.join(&tag),
            log_dir: log_root.join(&tag),
            tag,
        }
    }

    pub fn for_trial(run: &RunConfig, id: TrialId) -> Self {
        Self::new(&run.run_path, &run.out_path, &run.log_path, id)
    }

    /// Layout over the directories recorded when the trial was materialized.
    pub fn of_artifacts(tag: String, artifacts: &TrialArtifacts) -> Self {
        Self {
            tag,
            run_dir: artifacts.run_dir.clone(),
            out_dir: artifacts.out_dir.clone(),
            log_dir: artifacts.log_dir.clone(),
        }
    }

    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.run_dir)?;
        std::fs::create_dir_all(&self.out_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }

    pub fn geometry_dir(&self) -> PathBuf {
        self.run_dir.join("geometry")
    }

    pub fn output(&self, label: &str, steering: &str, stage: Stage) -> PathBuf {
        self.out_dir
            .join(output_name(&self.tag, label, &steering_tag(steering), stage))
    }

    pub fn analysis_output(&self, label: &str, objective: &str) -> PathBuf {
        self.out_dir
            .join(analysis_output_name(&self.tag, label, objective))
    }

    pub fn script(&self, label: &str, steering: &str, stage: Stage) -> PathBuf {
        self.run_dir
            .join(script_name(&self.tag, label, &steering_tag(steering), stage))
    }

    pub fn logs(&self, stage: Stage, label: &str, detail: &str) -> (PathBuf, PathBuf) {
        let (out, err) = log_names(stage, label, detail);
        (self.log_dir.join(out), self.log_dir.join(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn steering_tag_strips_python_suffix() {
        assert_eq!(steering_tag("central.e5ele.py"), "central_e5ele");
        assert_eq!(steering_tag("forward.steer"), "forward_steer");
    }

    #[test]
    fn output_names_follow_pipeline_convention() {
        assert_eq!(
            output_name("trial00001", "single_electron", "central_e5ele", Stage::Simulation),
            "aid2e_sim.trial00001_single_electron_central_e5ele.edm4hep.root"
        );
        assert_eq!(
            output_name("trial00001", "single_electron", "central_e5ele", Stage::Reconstruction),
            "aid2e_rec.trial00001_single_electron_central_e5ele.edm4eic.root"
        );
        assert_eq!(
            analysis_output_name("trial00001", "single_electron", "ElectronEnergyResolution"),
            "aid2e_ana.trial00001_single_electron_ElectronEnergyResolution.root"
        );
        assert_eq!(
            script_name("trial00001", "e", "c", Stage::Simulation),
            "do_aid2e_sim.trial00001_e_c.sh"
        );
    }

    #[test]
    fn layout_creates_all_trial_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TrialLayout::new(
            &dir.path().join("run"),
            &dir.path().join("out"),
            &dir.path().join("log"),
            TrialId(3),
        );
        layout.create().unwrap();
        assert!(layout.run_dir.ends_with("run/trial00003"));
        assert!(layout.out_dir.is_dir());
        assert!(layout.log_dir.is_dir());
        let (out, err) = layout.logs(Stage::Simulation, "e", "central_e5ele");
        assert!(out.ends_with("log/trial00003/sim.e_central_e5ele.out"));
        assert!(err.ends_with("log/trial00003/sim.e_central_e5ele.err"));
    }

    proptest! {
        #[test]
        fn output_paths_are_injective_in_trial_id(a in 0u64..1_000_000, b in 0u64..1_000_000) {
            prop_assume!(a != b);
            let root = Path::new("/data");
            let la = TrialLayout::new(root, root, root, TrialId(a));
            let lb = TrialLayout::new(root, root, root, TrialId(b));
            for stage in [Stage::Simulation, Stage::Reconstruction] {
                prop_assert_ne!(
                    la.output("e", "central.e5ele.py", stage),
                    lb.output("e", "central.e5ele.py", stage)
                );
            }
            prop_assert_ne!(la.analysis_output("e", "E"), lb.analysis_output("e", "E"));
            prop_assert_ne!(la.run_dir, lb.run_dir);
        }
    }
}
