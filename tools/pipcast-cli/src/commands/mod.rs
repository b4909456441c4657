pub mod check;
pub mod record;
pub mod transcode;

/// Print a transcode percentage on a single updating line.
pub fn print_progress(label: &'static str) -> pipcast_transcoder::ProgressCallback {
    Box::new(move |percent: u8| {
        use std::io::Write;
        print!("\r  {label}: {percent:>3}%");
        if percent == 100 {
            println!();
        }
        let _ = std::io::stdout().flush();
    })
}
