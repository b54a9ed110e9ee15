fn main() {
    if let Err(e) = riskchat_lib::run() {
        eprintln!("riskchat: {:#}", e);
        std::process::exit(1);
    }
}
