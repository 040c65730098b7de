fn main() {
    if let Err(err) = sentencing_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
