//! Init command handlers
//!
//! Generates editor support for writing Lua jobs: `.luarc.json` and LuaLS
//! stubs for the globals a job script sees.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use std::fs;
use std::path::Path;

/// Directory, relative to the output directory, holding generated stubs
const STUBS_DIR: &str = ".drover/stubs";

/// Init subcommands
#[derive(Subcommand)]
pub enum InitCommands {
    /// Generate Lua development files (.luarc.json and stubs)
    Lua {
        /// Output directory for generated files, usually the jobs root
        #[arg(short, long, default_value = ".")]
        output: String,

        /// Generate only .luarc.json
        #[arg(long, conflicts_with = "stubs_only")]
        config_only: bool,

        /// Generate only stub files
        #[arg(long)]
        stubs_only: bool,
    },
}

/// Handle init commands
pub fn handle_init_command(command: InitCommands) -> Result<()> {
    match command {
        InitCommands::Lua {
            output,
            config_only,
            stubs_only,
        } => {
            let output_path = Path::new(&output);
            if !stubs_only {
                generate_luarc_json(output_path)?;
            }
            if !config_only {
                generate_stub_files(output_path)?;
            }

            println!("{}", "✓ Lua development files generated!".green().bold());
            println!();
            println!("{}", "Next steps:".bold());
            println!("  1. Install Lua Language Server in your editor");
            println!("  2. Register jobs with jobs.register{{ ... }} in your scripts");
            println!("  3. Use {} to pick them up", "drover refresh".cyan());
            Ok(())
        }
    }
}

fn luarc_json() -> String {
    let globals: Vec<String> = drover_lua::modules::stub_files()
        .iter()
        .map(|(name, _)| format!("\"{}\"", name))
        .collect();

    format!(
        r#"{{
  "$schema": "https://raw.githubusercontent.com/sumneko/vscode-lua/master/setting/schema.json",
  "runtime": {{
    "version": "Lua 5.4"
  }},
  "diagnostics": {{
    "globals": [{}]
  }},
  "workspace": {{
    "library": ["{}"],
    "checkThirdParty": false
  }},
  "completion": {{
    "callSnippet": "Both"
  }}
}}
"#,
        globals.join(", "),
        STUBS_DIR
    )
}

/// Generate .luarc.json for Lua LSP configuration
fn generate_luarc_json(output_path: &Path) -> Result<()> {
    let luarc_path = output_path.join(".luarc.json");

    fs::write(&luarc_path, luarc_json())
        .with_context(|| format!("Failed to write .luarc.json to {:?}", luarc_path))?;

    println!("  {} .luarc.json", "Created".green());
    Ok(())
}

/// Write one stub file per global, from the module implementations
fn generate_stub_files(output_path: &Path) -> Result<()> {
    let stubs_dir = output_path.join(STUBS_DIR);
    fs::create_dir_all(&stubs_dir)
        .with_context(|| format!("Failed to create stubs directory at {:?}", stubs_dir))?;

    for (name, content) in drover_lua::modules::stub_files() {
        let stub_path = stubs_dir.join(format!("{}.lua", name));
        fs::write(&stub_path, content)
            .with_context(|| format!("Failed to write stub file {:?}", stub_path))?;
        println!("  {} {}.lua", "Created".green(), name);
    }

    println!(
        "  {} in {}",
        "Stubs ready".green(),
        stubs_dir.display().to_string().cyan()
    );
    Ok(())
}
