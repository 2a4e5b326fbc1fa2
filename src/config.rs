use crate::debugger::Error;
use crate::{asm_error, asm_warn, muted_error, weak_error};
use serde::Deserialize;
use std::fs::read_to_string;
use std::num::NonZeroUsize;
use std::path::Path;
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Assembler syntax used when rendering instructions of a disassembly source.
#[derive(Copy, Clone, PartialEq, Debug, Default, EnumString, Display, IntoStaticStr)]
pub enum AsmSyntax {
    #[default]
    #[strum(serialize = "att")]
    Att,
    #[strum(serialize = "intel")]
    Intel,
}

const DEFAULT_CACHE_SIZE: usize = 1000;

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Instruction syntax.
    pub syntax: AsmSyntax,
    /// How many disassembled functions are cached by live-process disassembler.
    pub disasm_cache_size: NonZeroUsize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            syntax: AsmSyntax::default(),
            disasm_cache_size: NonZeroUsize::new(DEFAULT_CACHE_SIZE).expect("infallible"),
        }
    }
}

/// On-disk representation, every field is optional.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    syntax: Option<String>,
    disasm_cache_size: Option<usize>,
}

impl Config {
    const DEFAULT_PATH: &'static str = ".config/asmbp/config.toml";

    /// Parse configuration from a TOML document.
    pub fn from_toml(data: &str) -> Result<Self, Error> {
        let file: ConfigFile = toml::de::from_str(data)?;
        let mut config = Config::default();
        if let Some(syntax) = file.syntax {
            match syntax.parse() {
                Ok(syntax) => config.syntax = syntax,
                Err(_) => {
                    asm_warn!(
                        target: "asmbp",
                        "unknown assembler syntax `{syntax}`, use default"
                    );
                }
            }
        }
        if let Some(size) = file.disasm_cache_size.and_then(NonZeroUsize::new) {
            config.disasm_cache_size = size;
        }
        Ok(config)
    }

    /// Load configuration from file, if `path` is `None` then `$HOME/.config/asmbp/config.toml`
    /// is used. Defaults are returned if file is missing or invalid.
    pub fn load(path: Option<&Path>) -> Self {
        let data = match path {
            None => {
                let Some(home) = home::home_dir() else {
                    return Self::default();
                };
                match muted_error!(read_to_string(home.join(Self::DEFAULT_PATH))) {
                    Some(data) => data,
                    None => return Self::default(),
                }
            }
            Some(path) => match read_to_string(path) {
                Ok(data) => data,
                Err(err) => {
                    asm_error!(target: "asmbp", "Error while load config file: {err}");
                    return Self::default();
                }
            },
        };

        weak_error!(Self::from_toml(&data), "invalid config file:").unwrap_or_default()
    }
}
