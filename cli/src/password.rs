//! Master password acquisition: TTY prompt or one line of stdin.

use std::io::{BufRead, IsTerminal};

use anyhow::{bail, Context};
use secrecy::zeroize::Zeroizing;
use secrecy::SecretString;

/// Read a password for `what`.
///
/// With `from_stdin`, the first line of stdin is used verbatim (minus the
/// line ending). Otherwise the user is prompted on the terminal. Either way
/// an empty password is refused.
pub fn read(what: &str, from_stdin: bool) -> anyhow::Result<SecretString> {
    if from_stdin {
        return read_line(&mut std::io::stdin().lock());
    }

    if !std::io::stdin().is_terminal() {
        bail!("no terminal to prompt for the {what} password; use --password-stdin");
    }
    let password = Zeroizing::new(
        rpassword::prompt_password(format!("{what} password: "))
            .context("failed to read password")?,
    );
    non_empty(&password)
}

/// First line of `input` as a password.
fn read_line(input: &mut impl BufRead) -> anyhow::Result<SecretString> {
    let mut line = Zeroizing::new(String::new());
    input
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    non_empty(line.trim_end_matches(['\r', '\n']))
}

fn non_empty(password: &str) -> anyhow::Result<SecretString> {
    if password.is_empty() {
        bail!("empty password not allowed");
    }
    Ok(SecretString::from(password))
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn stdin_line_loses_only_its_line_ending() {
        let mut input = &b" pass word \r\nsecond line\n"[..];
        let password = read_line(&mut input).unwrap();
        assert_eq!(password.expose_secret(), " pass word ");
    }

    #[test]
    fn consecutive_reads_take_consecutive_lines() {
        let mut input = &b"master\ncompanion\n"[..];
        assert_eq!(read_line(&mut input).unwrap().expose_secret(), "master");
        assert_eq!(read_line(&mut input).unwrap().expose_secret(), "companion");
    }

    #[test]
    fn empty_stdin_password_is_refused() {
        for input in [&b"\n"[..], &b"\r\n"[..], &b""[..]] {
            let mut input = input;
            let err = read_line(&mut input).unwrap_err();
            assert_eq!(err.to_string(), "empty password not allowed");
        }
    }

    #[test]
    fn prompt_and_stdin_share_the_emptiness_rule() {
        assert!(non_empty("").is_err());
        assert!(non_empty("x").is_ok());
    }
}
