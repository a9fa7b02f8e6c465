fn main() {
    if let Err(err) = fixture_seed::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
