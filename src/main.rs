fn main() -> anyhow::Result<()> {
    sv_cli::run()
}
