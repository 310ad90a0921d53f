#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::unnecessary_wraps)]

mod app;

use anyhow::Result;

fn main() -> Result<()> {
    app::run()
}
