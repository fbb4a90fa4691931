fn main() {
    if let Err(e) = wanderlust_lib::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
