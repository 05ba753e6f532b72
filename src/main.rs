use clap::Parser;

fn main() {
    let args = sshpool::cli::CliArgs::parse();
    std::process::exit(sshpool::cli::run(args));
}
