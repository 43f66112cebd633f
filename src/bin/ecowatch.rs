//! EcoWatch forest analysis CLI tool
//!
//! Command-line interface for deforestation analysis using the ecowatch
//! library's Tract backend.

fn main() -> anyhow::Result<()> {
    ecowatch::cli::main()
}
