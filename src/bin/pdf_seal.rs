//! Sign and verify PDF documents from the command line.
//!
//! Usage:
//!   pdf-seal sign <in.pdf> <out.pdf> --cert <file.p12> [--password P]
//!                 [--reason R] [--location L] [--contact C] [--reserved N]
//!                 [--digest sha256] [--max-xref-depth N]
//!   pdf-seal verify <file.pdf> [--all] [--max-xref-depth N]
//!   pdf-seal inspect <file.p12> [--password P]
//!
//! `--cert` and `--password` fall back to `CERTIFICATE_PATH` and
//! `CERTIFICATE_PASSWORD`. Results are printed as JSON.

use chrono::Utc;
use pdf_seal::crypto::{extract, validate_bundle, Certificate};
use pdf_seal::signatures::DigestAlgorithm;
use pdf_seal::{PdfSigner, SignerConfig};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str = "usage:
  pdf-seal sign <in.pdf> <out.pdf> --cert <file.p12> [--password P] [--reason R] [--location L] [--contact C] [--reserved N] [--digest ALG] [--max-xref-depth N]
  pdf-seal verify <file.pdf> [--all] [--max-xref-depth N]
  pdf-seal inspect <file.p12> [--password P]";

enum Command {
    Sign {
        input: PathBuf,
        output: PathBuf,
        config: SignerConfig,
    },
    Verify {
        input: PathBuf,
        all: bool,
        config: SignerConfig,
    },
    Inspect {
        container: PathBuf,
        password: String,
    },
}

impl Command {
    fn from_args(args: &[String]) -> Result<Self, String> {
        let mut positional = Vec::new();
        let mut config = SignerConfig::from_env();
        let mut all = false;

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || -> Result<String, String> {
                i += 1;
                args.get(i).cloned().ok_or_else(|| format!("{} needs a value", flag))
            };
            match flag {
                "--cert" => config.certificate_path = Some(PathBuf::from(value()?)),
                "--password" => config.certificate_password = Some(value()?),
                "--reason" => config.reason = value()?,
                "--location" => config.location = value()?,
                "--contact" => config.contact_info = Some(value()?),
                "--reserved" => {
                    let raw = value()?;
                    config.reserved_length = raw.parse().map_err(|_| format!("invalid --reserved value {:?}", raw))?;
                },
                "--digest" => {
                    let raw = value()?;
                    config.digest_algorithm =
                        DigestAlgorithm::from_name(&raw).ok_or_else(|| format!("unknown digest {:?}", raw))?;
                },
                "--max-xref-depth" => {
                    let raw = value()?;
                    config.max_xref_depth =
                        raw.parse().map_err(|_| format!("invalid --max-xref-depth value {:?}", raw))?;
                },
                "--all" => all = true,
                other if other.starts_with("--") => return Err(format!("unknown option {}", other)),
                other => positional.push(other.to_string()),
            }
            i += 1;
        }

        match positional.first().map(String::as_str) {
            Some("sign") if positional.len() == 3 => Ok(Command::Sign {
                input: PathBuf::from(&positional[1]),
                output: PathBuf::from(&positional[2]),
                config,
            }),
            Some("verify") if positional.len() == 2 => Ok(Command::Verify {
                input: PathBuf::from(&positional[1]),
                all,
                config,
            }),
            Some("inspect") if positional.len() == 2 => Ok(Command::Inspect {
                container: PathBuf::from(&positional[1]),
                password: config.certificate_password.unwrap_or_default(),
            }),
            _ => Err(USAGE.to_string()),
        }
    }
}

fn run(command: Command) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    match command {
        Command::Sign { input, output, config } => {
            let cert_path = config
                .certificate_path
                .clone()
                .ok_or("no certificate: pass --cert or set CERTIFICATE_PATH")?;
            let password = config.certificate_password.clone().unwrap_or_default();

            let pdf = fs::read(&input)?;
            let container = fs::read(&cert_path)?;
            let signer = PdfSigner::from_pkcs12(&container, &password, config.sign_options())?;
            let signed = signer.sign(&pdf)?;
            fs::write(&output, &signed)?;

            Ok(json!({
                "output": output.display().to_string(),
                "input_bytes": pdf.len(),
                "output_bytes": signed.len(),
                "signer": signer.bundle().leaf().common_name(),
            }))
        },
        Command::Verify { input, all, config } => {
            let pdf = fs::read(&input)?;
            let verifier = config.verifier();
            if all {
                Ok(serde_json::to_value(verifier.verify_all(&pdf)?)?)
            } else {
                Ok(serde_json::to_value(verifier.verify(&pdf)?)?)
            }
        },
        Command::Inspect { container, password } => {
            let bytes = fs::read(&container)?;
            let bundle = extract(&bytes, &password)?;
            let describe = |cert: &Certificate| {
                let (not_before, not_after) = cert.validity_window();
                json!({
                    "subject": cert.subject(),
                    "issuer": cert.issuer(),
                    "serial": cert.serial_hex(),
                    "not_before": not_before,
                    "not_after": not_after,
                })
            };
            Ok(json!({
                "key_algorithm": bundle.private_key().algorithm_name(),
                "certificate": describe(bundle.leaf()),
                "chain": bundle.chain().iter().map(describe).collect::<Vec<_>>(),
                "validation": validate_bundle(&bundle, Utc::now()),
            }))
        },
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::from_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        },
    };
    let is_verify = matches!(command, Command::Verify { .. });

    match run(command) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            let invalid = is_verify
                && match &report {
                    serde_json::Value::Array(items) => items.iter().any(|r| r["is_valid"] != json!(true)),
                    single => single["is_valid"] != json!(true),
                };
            if invalid {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}
