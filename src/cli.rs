// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Line commands accepted by the `formpane` binary on stdin

use thiserror::Error;

use crate::ports::SignatureMode;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command :{0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// One user command, the `:`-prefixed lines on stdin
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Page(u32),
    Scale(f64),
    Select(Option<String>),
    Text { name: String, value: String },
    Check { name: String, checked: bool },
    Sign { mode: SignatureMode, image_base64: String },
    Clear,
    Save,
    Close,
}

/// Parse a command line without its leading `:`.
pub fn parse_command(line: &str) -> Result<UserCommand, CommandError> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match verb {
        "page" => rest.parse().map(UserCommand::Page).map_err(|_| CommandError::Usage(":page N")),
        "scale" => rest.parse().map(UserCommand::Scale).map_err(|_| CommandError::Usage(":scale S")),
        "select" => Ok(UserCommand::Select((!rest.is_empty()).then(|| rest.to_string()))),
        "text" => {
            let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));
            if name.is_empty() {
                return Err(CommandError::Usage(":text NAME VALUE"));
            }
            Ok(UserCommand::Text {
                name: name.to_string(),
                value: value.to_string(),
            })
        }
        "check" => {
            let usage = CommandError::Usage(":check NAME true|false");
            let (name, checked) = rest.split_once(char::is_whitespace).ok_or(usage.clone())?;
            let checked = checked.trim().parse().map_err(|_| usage)?;
            Ok(UserCommand::Check {
                name: name.to_string(),
                checked,
            })
        }
        "sign" => {
            let usage = CommandError::Usage(":sign all|NAME IMAGE_BASE64");
            let (target, image) = rest.split_once(char::is_whitespace).ok_or(usage)?;
            let mode = match target {
                "all" => SignatureMode::All,
                name => SignatureMode::Single(name.to_string()),
            };
            Ok(UserCommand::Sign {
                mode,
                image_base64: image.trim().to_string(),
            })
        }
        "clear" => Ok(UserCommand::Clear),
        "save" => Ok(UserCommand::Save),
        "close" => Ok(UserCommand::Close),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}
