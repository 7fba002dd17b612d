// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use keysampler::audio;
use keysampler::config::Player;
use keysampler::controller::{keyboard, Controller, InputRouter};
use keysampler::keymap::{rate_for, PhysicalKey, REFERENCE_PITCH};
use keysampler::samples::SampleEngine;
use tracing::info;
use tracing_subscriber::EnvFilter;

const PLAY_HELP: &str = "\
Play with the letter rows. Enter sets the fade out time, Ctrl+L loads a new
sample, Esc or Ctrl+C quits.";

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A keyboard sampler."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Prints the key to pitch map.
    Keymap {
        /// The path to the player config.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Plays a sample from the keyboard.
    Play {
        /// The path to the player config.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// The device name to play through. Overrides the config.
        #[arg(short, long)]
        device: Option<String>,
        /// The sample to load. Overrides the config.
        sample: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<Player, Box<dyn Error>> {
    Ok(match path {
        Some(path) => Player::deserialize(&path)?,
        None => Player::default(),
    })
}

/// One line of the key map listing: key, pitch, transposition and rate.
fn describe_key(key: PhysicalKey, pitch: i32) -> String {
    format!(
        "{:<12} pitch {:>3}  {:>+3} st  rate {:.4}",
        key.to_string(),
        pitch,
        pitch - REFERENCE_PITCH,
        rate_for(pitch)
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Keymap { config } => {
            let keymap = load_config(config)?.keymap()?;

            println!("Keys (count: {}):", keymap.len());
            for (key, pitch) in keymap.sorted() {
                println!("- {}", describe_key(key, pitch));
            }
        }
        Commands::Play {
            config,
            device,
            sample,
        } => {
            let mut player = load_config(config)?;
            if let Some(device) = device {
                player.set_device(&device);
            }
            if let Some(sample) = sample {
                player.set_sample(sample);
            }

            let keymap = player.keymap()?;
            let device = audio::get_device(player.audio())?;
            info!(device = %device, "Using audio device");

            let mut engine = SampleEngine::new(device);
            engine.ensure_graph()?;
            match player.sample() {
                Some(path) => {
                    let buffer = engine.load_file(path).await?;
                    info!(
                        path = %path.display(),
                        duration_ms = buffer.duration().as_millis(),
                        "Loaded sample"
                    );
                }
                None => println!("No sample loaded yet. Press Ctrl+L to load one."),
            }

            println!("{}", PLAY_HELP);
            let terminal = keyboard::TerminalGuard::enable()?;
            if !terminal.reports_releases() {
                println!(
                    "This terminal does not report key releases: notes play out and held keys retrigger once."
                );
            }

            let mut controller = Controller::new(
                engine,
                InputRouter::new(keymap),
                Arc::new(keyboard::Driver::new(terminal.reports_releases())),
            );
            controller.join().await?;
            drop(terminal);
            println!();
        }
    }

    Ok(())
}
