/*
 * resolve-builder - Build orchestration for the DaVinci Resolve Flatpak.
 * Copyright (C) 2025  resolve-builder contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{anyhow, Result};
use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

mod channel;
mod config;
mod downloader;
mod error;
mod installer;
mod logging;
mod metainfo;
mod pipeline;
mod resolver;
mod vendor;

use channel::ReleaseChannel;
use config::Config;
use installer::extract::AppImageUnpacker;
use pipeline::Pipeline;
use vendor::HttpTransport;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Copyright (C) 2025  resolve-builder contributors\n",
    "License GPLv3+: GNU GPL version 3 or later <https://gnu.org/licenses/gpl.html>\n\n",
    "This is free software; you are free to change and redistribute it.\n",
    "There is NO WARRANTY, to the extent permitted by law."
);

#[derive(Parser)]
#[command(name = "resolve-builder")]
#[command(version = VERSION)]
#[command(long_version = LONG_VERSION)]
#[command(about = "Fetch DaVinci Resolve and install it into a Flatpak prefix.")]
struct Cli {
    #[arg(long, help = "Build the beta channel, falling back to stable")]
    beta: bool,
    #[arg(long, value_name = "FILE", help = "Configuration file")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Sandbox prefix to install into")]
    prefix: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "Use a local installer zip instead of downloading")]
    artifact: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Directory with desktop/ and metainfo/ templates")]
    templates: Option<PathBuf>,
    #[arg(long, help = "Only list the built release in the metainfo")]
    skip_metainfo_history: bool,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

impl Cli {
    /// Flags win over every other configuration source
    fn apply(&self, mut config: Config) -> Config {
        if let Some(prefix) = &self.prefix {
            config.paths.prefix = prefix.clone();
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.paths.cache_dir = cache_dir.clone();
        }
        if let Some(artifact) = &self.artifact {
            config.paths.artifact = Some(artifact.clone());
        }
        if let Some(templates) = &self.templates {
            config.paths.templates_dir = templates.clone();
        }
        if self.skip_metainfo_history {
            config.metainfo.release_history = false;
        }
        match self.verbose {
            0 => {}
            1 => config.logging.level = "debug".to_string(),
            _ => config.logging.level = "trace".to_string(),
        }
        if let Some(log_file) = &self.log_file {
            config.logging.file = Some(log_file.clone());
        }
        config
    }

    /// Apply the flags, then check the result the way file settings are checked
    fn configure(&self, loaded: Config) -> error::BuilderResult<Config> {
        let config = self.apply(loaded);
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.configure(Config::load(cli.config.as_deref())?)?;
    logging::init(&config.logging);

    let channel = ReleaseChannel::from_beta_flag(cli.beta);
    println!(
        "{}",
        style(format!(":: building {} ({} channel)", channel.app_id(), channel)).bold()
    );

    let transport = HttpTransport::new(&config.api)
        .map_err(|e| anyhow!("configuration: cannot set up HTTP client: {}", e))?;

    let report = match Pipeline::new(config, channel, Arc::new(transport), Box::new(AppImageUnpacker))
        .run()
        .await
    {
        Ok(report) => report,
        Err(e) => {
            let stage = e.stage();
            return Err(anyhow::Error::new(e).context(format!("{} stage failed", stage)));
        }
    };

    let resolution = &report.resolution;
    if resolution.fell_back {
        println!(
            "{}",
            style(":: no beta release is published, built the stable release instead").yellow()
        );
    }
    println!(
        "{}",
        style(format!(
            ":: installed {} {} into {}",
            channel.app_name(),
            resolution.info.version,
            report.layout.root().display()
        ))
        .green()
        .bold()
    );
    println!(
        "{}",
        style(format!(":: metainfo written to {}", report.metainfo_path.display())).dim()
    );
    Ok(())
}
