use color_eyre::{
    Result,
    config::{HookBuilder, Theme},
};

fn main() -> Result<()> {
    yansi::whenever(yansi::Condition::TTY_AND_COLOR);
    if yansi::is_enabled() {
        color_eyre::install()?;
    } else {
        HookBuilder::default().theme(Theme::new()).install()?;
    }

    cli::cache_main()
}

mod cache;
mod cli;
mod git;
mod retry;
mod tools;
mod types;

pub use types::*;
