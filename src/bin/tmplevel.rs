use anyhow::Result;

fn main() -> Result<()> {
    tmplevel::cli::run()
}
