pub mod cleanup;
pub mod run;
pub mod setup;

use std::path::PathBuf;

#[derive(Debug)]
pub enum Action {
    Run { config: PathBuf },
    Setup { config: PathBuf },
    Cleanup { config: PathBuf },
}
