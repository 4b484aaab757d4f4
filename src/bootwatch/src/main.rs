use bootwatch::cli;

pub fn main() -> anyhow::Result<()> {
    cli::process_command()
}
