use node::cli::Args;

pub fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    args.run()
}
