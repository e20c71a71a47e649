//! Serialization of a [`Command`] into a `/bin/sh` command line

use crate::command::Command;
use crate::error::{EnvNameProblem, ExecError};

/// Escape `val` so that `/bin/sh` interprets it completely literally,
/// with no expansions at all.
#[must_use]
pub fn quote(val: &str) -> String {
    format!("'{}'", val.replace('\'', r"'\''"))
}

/// Check that `name` can appear unquoted before `=` in a shell word.
///
/// # Errors
/// Returns `ExecError::InvalidEnvironmentName` naming the offending character
pub fn check_env_name(name: &str) -> Result<(), ExecError> {
    let invalid = |problem| ExecError::InvalidEnvironmentName {
        name: name.to_string(),
        problem,
    };

    if name.is_empty() {
        return Err(invalid(EnvNameProblem::Empty));
    }

    for (i, c) in name.chars().enumerate() {
        match c {
            'a'..='z' | 'A'..='Z' | '_' => {}
            '0'..='9' if i == 0 => return Err(invalid(EnvNameProblem::LeadingDigit(c))),
            '0'..='9' => {}
            _ => return Err(invalid(EnvNameProblem::IllegalCharacter(c))),
        }
    }
    Ok(())
}

/// Turn `cmd` into a single command string for a remote shell.
///
/// The result runs `/bin/sh -c` on an inner line that changes to
/// `cmd.dir`, resets the environment with `/usr/bin/env -`, and then
/// execs `cmd.path` with exactly `cmd.env` set. Environment names are
/// emitted in sorted order, so equal commands always produce identical
/// strings.
///
/// # Errors
/// Returns `ExecError::EmptyPath` or `ExecError::InvalidEnvironmentName`;
/// nothing is produced in that case.
pub fn command_line(cmd: &Command) -> Result<String, ExecError> {
    if cmd.path.is_empty() {
        return Err(ExecError::EmptyPath);
    }

    let mut parts = Vec::with_capacity(cmd.args.len() + cmd.env.len() + 6);

    if !cmd.dir.is_empty() {
        parts.push("cd".to_string());
        parts.push(quote(&cmd.dir));
        parts.push("&&".to_string());
    }

    parts.push(quote("/usr/bin/env"));
    parts.push(quote("-"));

    for (name, value) in cmd.sorted_env() {
        check_env_name(name)?;
        parts.push(format!("{name}={}", quote(value)));
    }

    parts.push(quote(&cmd.path));
    parts.extend(cmd.args.iter().map(|arg| quote(arg)));

    Ok([quote("/bin/sh"), quote("-c"), quote(&parts.join(" "))].join(" "))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::process::Command as ShellCommand;

    use proptest::prelude::*;

    use super::*;

    fn sh(line: &str) -> String {
        let out = ShellCommand::new("/bin/sh")
            .arg("-c")
            .arg(line)
            .output()
            .unwrap();
        assert!(
            out.status.success(),
            "shell failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8(out.stdout).unwrap()
    }

    #[test]
    fn test_quote() {
        let cases = [
            ("foo", "'foo'"),
            ("f'tang", r"'f'\''tang'"),
            ("'bar'", r"''\''bar'\'''"),
            ("", "''"),
        ];
        for (input, want) in cases {
            assert_eq!(quote(input), want, "quoting {input:?}");
        }
    }

    #[test]
    fn test_quote_is_literal_in_shell() {
        for input in ["", "a b", "line\nbreak", "$HOME `id` $(id) *", "it's", "\\n"] {
            let got = sh(&format!("printf %s {}", quote(input)));
            assert_eq!(got, input);
        }
    }

    #[test]
    fn test_env_names_accepted() {
        for name in ["UNIVERSE", "_", "a1", "PATH_2", "lower_case"] {
            assert!(check_env_name(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn test_env_names_rejected() {
        let cases = [
            ("1ABC", EnvNameProblem::LeadingDigit('1')),
            ("FOO-BAR", EnvNameProblem::IllegalCharacter('-')),
            ("foo.bar", EnvNameProblem::IllegalCharacter('.')),
            ("A B", EnvNameProblem::IllegalCharacter(' ')),
            ("X=Y", EnvNameProblem::IllegalCharacter('=')),
            ("ÄPFEL", EnvNameProblem::IllegalCharacter('Ä')),
            ("", EnvNameProblem::Empty),
        ];
        for (name, want) in cases {
            match check_env_name(name) {
                Err(ExecError::InvalidEnvironmentName { name: got, problem }) => {
                    assert_eq!(got, name);
                    assert_eq!(problem, want);
                }
                other => panic!("{name:?}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_command_line_exact() {
        let cmd = Command::new("/usr/bin/printenv")
            .arg("UNIVERSE")
            .env("UNIVERSE", "testing")
            .dir("/tmp");

        let inner = "cd '/tmp' && '/usr/bin/env' '-' UNIVERSE='testing' '/usr/bin/printenv' 'UNIVERSE'";
        assert_eq!(
            command_line(&cmd).unwrap(),
            format!("'/bin/sh' '-c' {}", quote(inner))
        );
    }

    #[test]
    fn test_command_line_runs() {
        let cases = [
            (
                "foo bar r'lyeh\n",
                Command::new("/usr/bin/echo").args(["foo", "bar", "r'lyeh"]),
            ),
            (
                "testing\n",
                Command::new("/usr/bin/printenv")
                    .arg("UNIVERSE")
                    .env("UNIVERSE", "testing"),
            ),
            ("/\n", Command::new("/usr/bin/pwd").dir("/")),
            (
                "/tmp\nr'lyeh\n",
                Command::new("/bin/sh")
                    .args(["-c", "pwd && printenv UNIVERSE"])
                    .env("UNIVERSE", "r'lyeh")
                    .dir("/tmp"),
            ),
        ];

        for (want, cmd) in cases {
            let line = command_line(&cmd).unwrap();
            assert_eq!(sh(&line), want, "running {line}");
        }
    }

    #[test]
    fn test_command_line_isolates_environment() {
        let cmd = Command::new("/usr/bin/env")
            .env("ONLY", "this")
            .env("AND", "that");
        let line = command_line(&cmd).unwrap();

        let out = ShellCommand::new("/bin/sh")
            .arg("-c")
            .arg(&line)
            .env("LEAKED_SECRET", "hunter2")
            .output()
            .unwrap();

        assert_eq!(String::from_utf8(out.stdout).unwrap(), "AND=that\nONLY=this\n");
    }

    #[test]
    fn test_command_line_deterministic() {
        let names = ["ZETA", "ALPHA", "MID", "_U", "b2"];
        let forward: HashMap<String, String> = names
            .iter()
            .map(|n| ((*n).to_string(), format!("v-{n}")))
            .collect();
        let backward: HashMap<String, String> = names
            .iter()
            .rev()
            .map(|n| ((*n).to_string(), format!("v-{n}")))
            .collect();

        let a = Command::new("/bin/true").envs(forward);
        let b = Command::new("/bin/true").envs(backward);

        let line = command_line(&a).unwrap();
        assert_eq!(line, command_line(&b).unwrap());
        assert_eq!(line, command_line(&a).unwrap());

        let alpha = line.find("ALPHA=").unwrap();
        let zeta = line.find("ZETA=").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn test_command_line_rejects_bad_env() {
        let cmd = Command::new("/bin/true")
            .env("GOOD", "1")
            .env("BAD-NAME", "2");
        assert!(matches!(
            command_line(&cmd),
            Err(ExecError::InvalidEnvironmentName { ref name, .. }) if name == "BAD-NAME"
        ));
    }

    #[test]
    fn test_command_line_rejects_empty_path() {
        assert!(matches!(
            command_line(&Command::new("")),
            Err(ExecError::EmptyPath)
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_quote_round_trips_through_shell(input in "[^\\x00]{0,40}") {
            let got = sh(&format!("printf %s {}", quote(&input)));
            prop_assert_eq!(got, input);
        }

        #[test]
        fn prop_well_formed_env_names_accepted(name in "[A-Za-z_][A-Za-z0-9_]{0,30}") {
            prop_assert!(check_env_name(&name).is_ok());
        }

        #[test]
        fn prop_names_with_foreign_characters_rejected(
            head in "[A-Za-z_]{0,5}",
            bad in "[^A-Za-z0-9_]",
            tail in "[A-Za-z0-9_]{0,5}",
        ) {
            let name = format!("{head}{bad}{tail}");
            prop_assert!(check_env_name(&name).is_err());
        }

        #[test]
        fn prop_leading_digit_rejected(digit in "[0-9]", tail in "[A-Za-z0-9_]{0,10}") {
            let name = format!("{digit}{tail}");
            prop_assert!(check_env_name(&name).is_err());
        }
    }
}
