// Human-readable error messages for playdeck

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::executor::BaselineError;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // Check NO_COLOR environment variable first (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Errors are written to stderr
    std::io::stderr().is_terminal()
}

/// All error types surfaced by the CLI
#[derive(Debug)]
pub enum DashError {
    /// Talking to the dashboard backend failed
    Api(ApiError),

    /// Configuration file missing fields or malformed
    Config(ConfigError),

    /// I/O errors
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    /// Baseline launch blocked by missing or invalid host settings
    Baseline {
        message: String,
        hosts: Vec<(String, String)>,
        suggestion: Option<String>,
    },

    /// Bad command-line input
    Usage {
        message: String,
        suggestion: Option<String>,
    },

    /// The live dashboard could not drive the terminal
    Terminal { message: String },

    /// A job the backend does not know about, or that could not be followed
    Job { job_id: String, message: String },
}

impl DashError {
    pub fn usage(message: impl Into<String>) -> Self {
        DashError::Usage {
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(self, hint: impl Into<String>) -> Self {
        match self {
            DashError::Usage { message, .. } => DashError::Usage {
                message,
                suggestion: Some(hint.into()),
            },
            DashError::Baseline { message, hosts, .. } => DashError::Baseline {
                message,
                hosts,
                suggestion: Some(hint.into()),
            },
            other => other,
        }
    }
}

impl std::error::Error for DashError {}

impl From<ApiError> for DashError {
    fn from(err: ApiError) -> Self {
        DashError::Api(err)
    }
}

impl From<ConfigError> for DashError {
    fn from(err: ConfigError) -> Self {
        DashError::Config(err)
    }
}

impl From<BaselineError> for DashError {
    fn from(err: BaselineError) -> Self {
        match err {
            BaselineError::Unconfigured { problems } => DashError::Baseline {
                message: format!(
                    "baseline settings missing or invalid for {} host(s)",
                    problems.len()
                ),
                hosts: problems,
                suggestion: Some(
                    "Pass --baseline-config <file> or --ask-baseline to provide them".to_string(),
                ),
            },
            BaselineError::Io { path, source } => DashError::Io {
                message: source.to_string(),
                path: Some(path),
            },
            other => DashError::Baseline {
                message: other.to_string(),
                hosts: Vec::new(),
                suggestion: None,
            },
        }
    }
}

impl From<std::io::Error> for DashError {
    fn from(err: std::io::Error) -> Self {
        DashError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

impl fmt::Display for DashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Set color mode based on TTY detection and NO_COLOR
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            DashError::Api(err) => {
                writeln!(f, "{}: {}", "API ERROR".red().bold(), err)?;
                if let Some(hint) = suggest_fix(self) {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), hint)?;
                }
                Ok(())
            }

            DashError::Config(err) => {
                writeln!(f, "{}: {}", "CONFIG ERROR".red().bold(), err)?;
                if let Some(hint) = suggest_fix(self) {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), hint)?;
                }
                Ok(())
            }

            DashError::Io { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }

            DashError::Baseline {
                message,
                hosts,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "BASELINE ERROR".red().bold(), message)?;
                for (host, problem) in hosts {
                    writeln!(f, "  {} {}", format!("{}:", host).cyan(), problem)?;
                }

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            DashError::Usage {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "ERROR".red().bold(), message)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            DashError::Terminal { message } => {
                writeln!(f, "{}: {}", "TERMINAL ERROR".red().bold(), message)
            }

            DashError::Job { job_id, message } => {
                writeln!(f, "{}: {}", "JOB ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Job:".dimmed(), job_id)?;
                Ok(())
            }
        }
    }
}

/// Suggest common fixes for errors
pub fn suggest_fix(error: &DashError) -> Option<String> {
    match error {
        DashError::Api(ApiError::Transport { source, .. }) => {
            if source.is_connect() {
                Some("Is the dashboard running? Check --server or PLAYDECK_SERVER".to_string())
            } else if source.is_timeout() {
                Some("The server is slow to answer; raise server.timeout_secs".to_string())
            } else {
                None
            }
        }

        DashError::Api(ApiError::InvalidUrl(_)) => {
            Some("Use a full URL such as http://127.0.0.1:5000".to_string())
        }

        DashError::Api(ApiError::Status { status, .. }) => match status {
            401 | 403 => Some("The dashboard rejected the request; check its login".to_string()),
            404 => Some("This server does not expose the job API under /api".to_string()),
            _ => None,
        },

        DashError::Config(ConfigError::Parse { .. }) => {
            Some("Check the YAML syntax and the field names".to_string())
        }

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_error_display() {
        let err = DashError::from(BaselineError::Unconfigured {
            problems: vec![
                ("web01".to_string(), "not configured".to_string()),
                (
                    "db01".to_string(),
                    "root_password must have at least 8 characters".to_string(),
                ),
            ],
        });

        let output = format!("{}", err);
        let clean_output = console::strip_ansi_codes(&output);

        assert!(clean_output.contains("BASELINE ERROR"));
        assert!(clean_output.contains("web01: not configured"));
        assert!(clean_output.contains("db01: root_password"));
        assert!(clean_output.contains("--ask-baseline"));
    }

    #[test]
    fn test_api_error_hints() {
        let err = DashError::from(ApiError::InvalidUrl("dash.lan".to_string()));
        let clean_output = console::strip_ansi_codes(&format!("{}", err)).to_string();
        assert!(clean_output.contains("invalid server URL 'dash.lan'"));
        assert!(clean_output.contains("Hint: Use a full URL"));

        let err = DashError::from(ApiError::Status {
            url: "http://x/api/run".to_string(),
            status: 400,
            message: "Playbook é obrigatório".to_string(),
        });
        assert_eq!(suggest_fix(&err), None);
        assert!(format!("{}", err).contains("Playbook é obrigatório"));
    }

    #[test]
    fn test_usage_with_suggestion() {
        let err = DashError::usage("no hosts selected").with_suggestion("Pass -H <host>");
        let clean_output = console::strip_ansi_codes(&format!("{}", err)).to_string();
        assert!(clean_output.contains("ERROR: no hosts selected"));
        assert!(clean_output.contains("Hint: Pass -H <host>"));
    }
}
