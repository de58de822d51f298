fn main() {
    if let Err(err) = sas_oracle::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
