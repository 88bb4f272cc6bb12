use phf::phf_map;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Executable,
    Input,
    Output,
    Flag,
}

static PLACEHOLDERS: phf::Map<&'static str, Placeholder> = phf_map! {
    "exec" => Placeholder::Executable,
    "input" => Placeholder::Input,
    "output" => Placeholder::Output,
    "flag" => Placeholder::Flag,
};

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TemplateError {
    #[error("Command template is empty")]
    Empty,
    #[error("Unknown placeholder '{{{0}}}' (expected one of exec, input, output, flag)")]
    UnknownPlaceholder(String),
    #[error("Unclosed '{{' in template token '{0}'")]
    Unclosed(String),
    #[error("Template uses '{{{0}}}' but no value was supplied")]
    MissingValue(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Slot(Placeholder),
}

/// A whitespace-tokenized command line with `{exec}`, `{input}`, `{output}` and
/// `{flag}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTemplate {
    raw: String,
    tokens: Vec<Vec<Segment>>,
}

/// Values substituted into a [`CommandTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct TemplateValues<'a> {
    pub executable: &'a Path,
    pub inputs: &'a [PathBuf],
    pub output: &'a Path,
    pub flag: Option<&'a str>,
}

impl CommandTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let tokens = raw
            .split_whitespace()
            .map(parse_token)
            .collect::<Result<Vec<_>, _>>()?;
        if tokens.is_empty() {
            return Err(TemplateError::Empty);
        }
        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn uses(&self, placeholder: Placeholder) -> bool {
        self.tokens
            .iter()
            .flatten()
            .any(|s| *s == Segment::Slot(placeholder))
    }

    /// Renders the template into an argument vector. A token that is exactly
    /// `{input}` expands to one argument per input file; inside a larger token the
    /// inputs are joined with commas.
    pub fn render(&self, values: &TemplateValues<'_>) -> Result<Vec<String>, TemplateError> {
        let mut argv = Vec::with_capacity(self.tokens.len() + values.inputs.len());
        for token in &self.tokens {
            if let [Segment::Slot(Placeholder::Input)] = token.as_slice() {
                argv.extend(values.inputs.iter().map(|p| p.display().to_string()));
                continue;
            }
            let mut arg = String::new();
            for segment in token {
                match segment {
                    Segment::Literal(text) => arg.push_str(text),
                    Segment::Slot(Placeholder::Executable) => {
                        arg.push_str(&values.executable.display().to_string())
                    }
                    Segment::Slot(Placeholder::Output) => {
                        arg.push_str(&values.output.display().to_string())
                    }
                    Segment::Slot(Placeholder::Input) => {
                        let joined = values
                            .inputs
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(",");
                        arg.push_str(&joined);
                    }
                    Segment::Slot(Placeholder::Flag) => {
                        arg.push_str(values.flag.ok_or(TemplateError::MissingValue("flag"))?)
                    }
                }
            }
            argv.push(arg);
        }
        Ok(argv)
    }
}

fn parse_token(token: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = token;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| TemplateError::Unclosed(token.to_string()))?;
        let name = &after[..close];
        let placeholder = PLACEHOLDERS
            .get(name)
            .copied()
            .ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_string()))?;
        segments.push(Segment::Slot(placeholder));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<'a>(inputs: &'a [PathBuf], flag: Option<&'a str>) -> TemplateValues<'a> {
        TemplateValues {
            executable: Path::new("/opt/ana/BICEnergyResolution.py"),
            inputs,
            output: Path::new("/out/ana.root"),
            flag,
        }
    }

    #[test]
    fn renders_all_placeholders() {
        let t = CommandTemplate::parse("python3 {exec} -i {input} -o {output} -p {flag}").unwrap();
        let inputs = vec![PathBuf::from("/out/rec.root")];
        let argv = t.render(&values(&inputs, Some("11"))).unwrap();
        assert_eq!(
            argv,
            vec![
                "python3",
                "/opt/ana/BICEnergyResolution.py",
                "-i",
                "/out/rec.root",
                "-o",
                "/out/ana.root",
                "-p",
                "11"
            ]
        );
    }

    #[test]
    fn standalone_input_expands_to_many_arguments() {
        let t = CommandTemplate::parse("{exec} {input}").unwrap();
        let inputs = vec![PathBuf::from("a.root"), PathBuf::from("b.root")];
        let argv = t.render(&values(&inputs, None)).unwrap();
        assert_eq!(argv.len(), 3);
        assert_eq!(argv[2], "b.root");
    }

    #[test]
    fn embedded_input_is_comma_joined() {
        let t = CommandTemplate::parse("{exec} --in={input}").unwrap();
        let inputs = vec![PathBuf::from("a.root"), PathBuf::from("b.root")];
        let argv = t.render(&values(&inputs, None)).unwrap();
        assert_eq!(argv[1], "--in=a.root,b.root");
    }

    #[test]
    fn rejects_unknown_and_unclosed_placeholders() {
        assert_eq!(
            CommandTemplate::parse("{exec} {bogus}").unwrap_err(),
            TemplateError::UnknownPlaceholder("bogus".into())
        );
        assert!(matches!(
            CommandTemplate::parse("{exec").unwrap_err(),
            TemplateError::Unclosed(_)
        ));
        assert_eq!(CommandTemplate::parse("   ").unwrap_err(), TemplateError::Empty);
    }

    #[test]
    fn missing_flag_value_is_an_error() {
        let t = CommandTemplate::parse("{exec} -p {flag}").unwrap();
        assert!(t.uses(Placeholder::Flag));
        assert_eq!(
            t.render(&values(&[], None)).unwrap_err(),
            TemplateError::MissingValue("flag")
        );
    }
}
