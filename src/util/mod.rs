pub mod fs;

/// Print a fatal diagnostic in the format `main` uses.
pub fn report_fatal(err: &anyhow::Error) {
    eprintln!("nestns: {err:#}");
}
