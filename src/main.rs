fn main() {
    if let Err(err) = table_refinery::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
