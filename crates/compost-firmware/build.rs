//! Bakes the deployment's sleep period into the image.
//!
//! `COMPOST_SLEEP_MINUTES` is read from the environment or a `.env` file next
//! to the manifest; the firmware falls back to the library default when unset.

fn main() {
    println!("cargo:rerun-if-changed=.env");
    println!("cargo:rerun-if-env-changed=COMPOST_SLEEP_MINUTES");

    let _ = dotenvy::dotenv();

    if let Ok(minutes) = std::env::var("COMPOST_SLEEP_MINUTES") {
        match minutes.trim().parse::<u32>() {
            Ok(minutes) if minutes > 0 => {
                println!("cargo:rustc-env=COMPOST_SLEEP_SECS={}", minutes * 60);
            }
            _ => println!("cargo:warning=ignoring COMPOST_SLEEP_MINUTES={minutes}"),
        }
    }
}
