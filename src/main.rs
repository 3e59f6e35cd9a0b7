fn main() {
    if let Err(err) = deferred_passes::run() {
        eprintln!("Application error: {err}");
    }
}
