fn main() {
    if let Err(err) = tabflow::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
