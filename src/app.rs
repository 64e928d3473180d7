//! The window: presents the surface, draws the caption and maps keys to
//! session commands.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eframe::egui;
use egui::*;

use crate::config::Config;
use crate::error::SpectralError;
use crate::session::{Command, Session};

const BINDINGS: [(Key, Command); 3] = [
    (Key::M, Command::Play),
    (Key::P, Command::TogglePause),
    (Key::S, Command::Stop),
];

const CAPTION_FONT: &str = "caption";

/// Opens the audio session and runs the window until it is closed.
pub fn run(config: Config) -> anyhow::Result<()> {
    let session = Session::new(config.clone())?;

    let options = eframe::NativeOptions {
        initial_window_size: Some(egui::vec2(config.width as f32, config.height as f32)),
        resizable: false,
        vsync: true,
        icon_data: load_icon(&config.icon_path),
        ..Default::default()
    };

    let failure = Arc::new(Mutex::new(None));
    let app_failure = Arc::clone(&failure);
    eframe::run_native(
        &config.title,
        options,
        Box::new(move |cc| Box::new(SpectralApp::new(cc, session, app_failure))),
    )
    .map_err(|e| SpectralError::Window(e.to_string()))?;

    let failure = failure.lock().ok().and_then(|mut f| f.take());
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn load_icon(path: &Path) -> Option<eframe::IconData> {
    match image::open(path) {
        Ok(icon) => {
            let icon = icon.into_rgba8();
            let (width, height) = icon.dimensions();
            Some(eframe::IconData {
                rgba: icon.into_raw(),
                width,
                height,
            })
        }
        Err(e) => {
            log::warn!("window icon {:?} not loaded: {}", path, e);
            None
        }
    }
}

/// Registers the caption font, falling back to the default proportional
/// font when the file cannot be read.
fn install_caption_font(ctx: &Context, path: &Path) -> FontFamily {
    match std::fs::read(path) {
        Ok(bytes) => {
            let mut fonts = FontDefinitions::default();
            fonts
                .font_data
                .insert(CAPTION_FONT.to_owned(), FontData::from_owned(bytes));
            fonts.families.insert(
                FontFamily::Name(CAPTION_FONT.into()),
                vec![CAPTION_FONT.to_owned()],
            );
            ctx.set_fonts(fonts);
            FontFamily::Name(CAPTION_FONT.into())
        }
        Err(e) => {
            log::warn!("font {:?} not opened: {}", path, e);
            FontFamily::Proportional
        }
    }
}

struct SpectralApp {
    session: Session,
    texture: Option<TextureHandle>,
    shown_generation: u64,
    caption_font: FontId,
    failure: Arc<Mutex<Option<SpectralError>>>,
}

impl SpectralApp {
    fn new(
        cc: &eframe::CreationContext<'_>,
        mut session: Session,
        failure: Arc<Mutex<Option<SpectralError>>>,
    ) -> Self {
        let ctx = cc.egui_ctx.clone();
        session.set_presenter(move || ctx.request_repaint());

        let config = session.config();
        let family = install_caption_font(&cc.egui_ctx, &config.font_path);
        let caption_font = FontId::new(config.font_size, family);

        Self {
            session,
            texture: None,
            shown_generation: 0,
            caption_font,
            failure,
        }
    }

    fn fail(&mut self, error: SpectralError, frame: &mut eframe::Frame) {
        log::error!("{}", error);
        if let Ok(mut slot) = self.failure.lock() {
            *slot = Some(error);
        }
        self.session.shutdown();
        frame.close();
    }

    /// Re-uploads the surface when a tick has painted a new frame.
    fn refresh_texture(&mut self, ctx: &Context) -> Result<(), SpectralError> {
        let surface = self.session.surface();
        let generation = surface.generation();
        if self.texture.is_some() && generation == self.shown_generation {
            return Ok(());
        }
        let image = surface.read(|fb| {
            ColorImage::from_rgba_unmultiplied(
                [fb.width() as usize, fb.height() as usize],
                &fb.to_rgba(),
            )
        })?;
        match self.texture.as_mut() {
            Some(texture) => texture.set(image, TextureOptions::NEAREST),
            None => {
                self.texture = Some(ctx.load_texture("spectrum", image, TextureOptions::NEAREST))
            }
        }
        self.shown_generation = generation;
        Ok(())
    }
}

impl eframe::App for SpectralApp {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        let commands: Vec<Command> = ctx.input(|i| {
            BINDINGS
                .iter()
                .filter(|(key, _)| i.key_pressed(*key))
                .map(|(_, command)| *command)
                .collect()
        });
        for command in commands {
            if let Err(e) = self.session.handle(command) {
                self.fail(e, frame);
                return;
            }
        }

        if let Err(e) = self.session.update() {
            self.fail(e, frame);
            return;
        }
        if let Some(e) = self.session.take_failure() {
            self.fail(e, frame);
            return;
        }
        if let Err(e) = self.refresh_texture(ctx) {
            self.fail(e, frame);
            return;
        }

        let config = self.session.config();
        let size = vec2(config.width as f32, config.height as f32);
        let (x, y) = config.caption_position;
        let caption = config.caption.clone();
        egui::CentralPanel::default()
            .frame(Frame::none().fill(Color32::BLACK))
            .show(ctx, |ui| {
                let painter = ui.painter();
                if let Some(texture) = &self.texture {
                    painter.image(
                        texture.id(),
                        Rect::from_min_size(Pos2::ZERO, size),
                        Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0)),
                        Color32::WHITE,
                    );
                }
                painter.text(
                    pos2(x, y),
                    Align2::LEFT_TOP,
                    caption,
                    self.caption_font.clone(),
                    Color32::WHITE,
                );
            });

        ctx.set_cursor_icon(CursorIcon::None);
        // keep audio bookkeeping running while no tick is driving repaints
        ctx.request_repaint_after(Duration::from_millis(16));
    }

    fn on_close_event(&mut self) -> bool {
        self.session.shutdown();
        true
    }
}
