use crate::cli::ConfigArgs;
use crate::config;
use crate::error::Result;
use bicmobo::core::config::models::{
    Config, ObjectiveConfig, OptimizerConfig, ParameterTarget, ResultSource,
};
use bicmobo::engine::space::{ParameterSpace, SearchDimension, ValueType};
use tracing::info;

pub async fn run(args: ConfigArgs) -> Result<()> {
    let documents = config::load_documents(&args)?;
    let config = config::validate(documents)?;
    info!("Configuration for '{}' is valid.", config.problem.name);

    for line in describe(&config) {
        println!("{}", line);
    }
    Ok(())
}

fn describe(config: &Config) -> Vec<String> {
    let space = ParameterSpace::new(&config.parameters);
    let optimizer = match &config.problem.optimizer {
        OptimizerConfig::Random { .. } => "random",
        OptimizerConfig::Explicit { .. } => "explicit",
    };
    let mut lines = vec![format!(
        "Problem '{}': up to {} trial(s), batches of {}, {} optimizer",
        config.problem.name,
        config.problem.max_trials,
        config.problem.batch_size,
        optimizer
    )];

    lines.push(format!("Search space ({} parameter(s)):", space.len()));
    for (dimension, spec) in space.describe().iter().zip(space.parameters()) {
        let domain = match dimension {
            SearchDimension::Range {
                bounds, value_type, ..
            } => {
                let kind = match value_type {
                    ValueType::Int => "int",
                    ValueType::Float => "float",
                };
                format!("{} in [{}, {}]", kind, bounds[0], bounds[1])
            }
            SearchDimension::Choice { values, .. } => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("one of {{{}}}", values.join(", "))
            }
        };
        let target = match &spec.target {
            ParameterTarget::Geometry(target) => format!(
                "geometry {}:{}[name={}].{}",
                target.compact.display(),
                target.element,
                target.name,
                target.attribute
            ),
            ParameterTarget::Reconstruction { path, .. } => format!("reconstruction {}", path),
        };
        lines.push(format!("  {:<24} {:<32} -> {}", dimension.name(), domain, target));
    }

    lines.extend(describe_objectives(&config.objectives));
    lines
}

fn describe_objectives(objectives: &ObjectiveConfig) -> Vec<String> {
    let mut lines = vec![format!("Objectives ({}):", objectives.objectives.len())];
    for objective in &objectives.objectives {
        let source = match objective.source {
            ResultSource::Stdout => "stdout",
            ResultSource::File => "file",
        };
        lines.push(format!(
            "  {:<24} {:?} over {} output of '{}' ({}, result from {})",
            objective.name,
            objective.direction,
            objective.stage,
            objective.input,
            objective.executable.display(),
            source
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use bicmobo::core::config::models::ObjectiveSpec;
    use bicmobo::core::models::objective::Direction;
    use bicmobo::core::models::stage::Stage;
    use bicmobo::core::utils::template::CommandTemplate;
    use std::path::PathBuf;

    #[test]
    fn objectives_are_listed_with_direction_and_stage() {
        let objectives = ObjectiveConfig {
            objectives: vec![ObjectiveSpec {
                name: "ElectronEnergyResolution".into(),
                input: "single_electron".into(),
                executable: PathBuf::from("/opt/bic/resolution.py"),
                rule: CommandTemplate::parse("{exec} {input} {output}").unwrap(),
                flag: None,
                stage: Stage::Reconstruction,
                direction: Direction::Minimize,
                source: ResultSource::Stdout,
            }],
        };

        let lines = describe_objectives(&objectives);
        assert_eq!(lines[0], "Objectives (1):");
        assert!(lines[1].contains("ElectronEnergyResolution"));
        assert!(lines[1].contains("Minimize"));
        assert!(lines[1].contains("single_electron"));
        assert!(lines[1].contains("result from stdout"));
    }
}
