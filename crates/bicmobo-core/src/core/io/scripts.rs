use crate::core::environment::EnvOverlay;
use std::io::Write;
use std::path::Path;

/// Writes an executable bash script that reproduces one pipeline command outside the
/// driver: the optional toolchain setup is sourced, the overlay exported, and the command
/// run with the same arguments.
pub fn write_driver_script(
    path: &Path,
    setup: Option<&Path>,
    env: &EnvOverlay,
    program: &Path,
    args: &[String],
) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "#!/bin/bash")?;
    writeln!(file)?;
    if let Some(setup) = setup {
        writeln!(file, "source {}", shell_quote(&setup.display().to_string()))?;
    }
    for (key, value) in env.iter() {
        writeln!(file, "export {}={}", key, shell_quote(value))?;
    }
    writeln!(file)?;

    let mut line = shell_quote(&program.display().to_string());
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    writeln!(file, "{}", line)?;
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Single-quotes `value` unless it consists only of characters the shell leaves alone.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(shell_quote("-Ppodio:output_file=a.root"), "-Ppodio:output_file=a.root");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("40*cm"), "'40*cm'");
    }

    #[test]
    fn script_sources_setup_and_exports_overlay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("do_aid2e_sim.trial00001_e_c.sh");
        let env = EnvOverlay::new()
            .with("DETECTOR", "epic")
            .with("DETECTOR_CONFIG", "epic_craterlake_trial00001");
        write_driver_script(
            &path,
            Some(Path::new("/opt/eic/setup.sh")),
            &env,
            Path::new("/usr/bin/npsim"),
            &["--outputFile".to_string(), "out dir/sim.root".to_string()],
        )
        .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "#!/bin/bash");
        assert!(lines.contains(&"source /opt/eic/setup.sh"));
        assert!(lines.contains(&"export DETECTOR=epic"));
        assert!(lines.contains(&"export DETECTOR_CONFIG=epic_craterlake_trial00001"));
        assert_eq!(
            *lines.last().unwrap(),
            "/usr/bin/npsim --outputFile 'out dir/sim.root'"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }
}
