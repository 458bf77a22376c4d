fn main() -> anyhow::Result<()> {
    isobench::run()
}
