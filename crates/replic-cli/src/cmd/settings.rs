use crate::output::print_json;
use clap::Subcommand;
use replic_core::settings::{EncryptedFileStore, SettingsStore};
use std::path::Path;

#[derive(Subcommand)]
pub enum SettingsSubcommand {
    /// Print the saved arguments with passwords masked
    Show,
    /// Delete the saved arguments
    Clear,
}

pub fn run(settings_file: &Path, subcommand: SettingsSubcommand) -> anyhow::Result<()> {
    let store = EncryptedFileStore::new(settings_file);
    match subcommand {
        SettingsSubcommand::Show => match store.load()? {
            Some(config) => print_json(&config.redacted()),
            None => {
                println!("No saved arguments in {}", settings_file.display());
                Ok(())
            }
        },
        SettingsSubcommand::Clear => {
            store.clear()?;
            println!("Saved arguments removed.");
            Ok(())
        }
    }
}
