// SPDX-License-Identifier: MIT OR Apache-2.0
//! `scenelink`: connect or disconnect two nodes of a scene description.
//!
//! ```text
//! scenelink <scene.ron> <from> <to> [--out-port N] [--in-port N]
//!           [--settings FILE] [--output FILE] [--disconnect]
//! ```
//!
//! The resulting scene is written to `--output`, or printed as RON.

use scenelink::{
    LinkError, LinkPath, LinkSettings, MemoryStore, SceneDescription, SceneError, SettingsError,
};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const USAGE: &str = "usage: scenelink <scene.ron> <from> <to> [--out-port N] [--in-port N] \
                     [--settings FILE] [--output FILE] [--disconnect]";

#[derive(Debug, thiserror::Error)]
enum ToolError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Default)]
struct Args {
    scene: PathBuf,
    from: String,
    to: String,
    out_port: Option<usize>,
    in_port: Option<usize>,
    settings: Option<PathBuf>,
    output: Option<PathBuf>,
    disconnect: bool,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, ToolError> {
        let mut parsed = Args::default();
        let mut positional = Vec::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--out-port" => parsed.out_port = Some(port_value(&arg, args.next())?),
                "--in-port" => parsed.in_port = Some(port_value(&arg, args.next())?),
                "--settings" => parsed.settings = Some(path_value(&arg, args.next())?),
                "--output" => parsed.output = Some(path_value(&arg, args.next())?),
                "--disconnect" => parsed.disconnect = true,
                flag if flag.starts_with("--") => {
                    return Err(ToolError::Usage(format!("unknown option {flag}")));
                }
                _ => positional.push(arg),
            }
        }
        let [scene, from, to]: [String; 3] = positional
            .try_into()
            .map_err(|_| ToolError::Usage("expected a scene file and two node paths".to_string()))?;
        parsed.scene = scene.into();
        parsed.from = from;
        parsed.to = to;
        Ok(parsed)
    }
}

fn path_value(flag: &str, value: Option<String>) -> Result<PathBuf, ToolError> {
    value
        .map(PathBuf::from)
        .ok_or_else(|| ToolError::Usage(format!("{flag} needs a file")))
}

fn port_value(flag: &str, value: Option<String>) -> Result<usize, ToolError> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ToolError::Usage(format!("{flag} needs a port index")))
}

fn run(args: Args) -> Result<(), ToolError> {
    let settings = match &args.settings {
        Some(path) => LinkSettings::load(path)?,
        None => LinkSettings::default(),
    };
    let scene = SceneDescription::load(&args.scene)?;
    let mut store = MemoryStore::from_description(&scene)?;

    let path = LinkPath::new(args.from.as_str(), args.to.as_str())
        .with_out_port(args.out_port)
        .with_in_port(args.in_port)
        .with_settings(&settings);
    if args.disconnect {
        let removed = path.disconnect_path(&mut store)?;
        tracing::info!("removed {removed} links for {path}");
    } else {
        let links = path.connect_path(&mut store)?;
        for link in &links {
            tracing::info!("{link}");
        }
    }

    let result = store.describe();
    match &args.output {
        Some(output) => {
            result.save(output)?;
            tracing::info!("wrote {}", output.display());
        }
        None => println!("{}", result.to_ron()?),
    }
    Ok(())
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scenelink=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = Args::parse(std::env::args().skip(1)).and_then(run);
    if let Err(e) = result {
        tracing::error!("scenelink failed: {e}");
        if matches!(e, ToolError::Usage(_)) {
            eprintln!("{USAGE}");
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, ToolError> {
        Args::parse(list.iter().map(ToString::to_string))
    }

    #[test]
    fn test_parse_args() {
        let parsed =
            args(&["scene.ron", "Top/A", "Top/G/B", "--in-port", "2", "--disconnect"]).unwrap();
        assert_eq!(parsed.scene, PathBuf::from("scene.ron"));
        assert_eq!(parsed.to, "Top/G/B");
        assert_eq!(parsed.in_port, Some(2));
        assert_eq!(parsed.out_port, None);
        assert!(parsed.disconnect);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(matches!(args(&["scene.ron", "Top/A"]), Err(ToolError::Usage(_))));
        assert!(matches!(
            args(&["scene.ron", "Top/A", "Top/B", "--in-port", "x"]),
            Err(ToolError::Usage(_))
        ));
        assert!(matches!(args(&["a", "b", "c", "--bogus"]), Err(ToolError::Usage(_))));
    }
}
