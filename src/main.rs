use env_logger::Env;
use spectral::Config;

// cargo run -r  (expects Guitar.wav, sdl_icone.bmp and angelina.ttf in the working directory)
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    spectral::app::run(Config::default()).map_err(|e| {
        log::error!("{:#}", e);
        e
    })
}
