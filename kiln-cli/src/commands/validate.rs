use crate::commands::display_path;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use kiln_service::ConfigParser;

/// Validate the workflows of a repository
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Repository root containing the .kiln directory (default: current directory)
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let repo_root = match args.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    if !repo_root.is_dir() {
        color_eyre::eyre::bail!("Repository directory not found: {}", repo_root.display());
    }

    output::status("Validating", &display_path(&repo_root));

    let paths = match ConfigParser::list_config_paths(&repo_root) {
        Ok(paths) => paths,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    let mut failures = 0;
    for path in &paths {
        match ConfigParser::load(&repo_root, Some(path)) {
            Ok(workflow) => {
                output::check(&format!(
                    "{} -> workflow '{}'",
                    path.display(),
                    workflow.name()
                ));
                for (index, name) in workflow.execution_order().iter().enumerate() {
                    let requires = workflow.requires(name);
                    if requires.is_empty() {
                        output::dim(&format!("      {}. {}", index + 1, name));
                    } else {
                        output::dim(&format!(
                            "      {}. {} (requires {})",
                            index + 1,
                            name,
                            requires.join(", ")
                        ));
                    }
                }
            }
            Err(e) => {
                failures += 1;
                output::failure(&format!("{}: {}", path.display(), e));
            }
        }
    }

    println!();
    if failures > 0 {
        output::error(&format!(
            "{} of {} workflow file(s) invalid",
            failures,
            paths.len()
        ));
        std::process::exit(1);
    }

    output::success(&format!("{} workflow file(s) valid", paths.len()));
    Ok(())
}
