//! Desktop interface
//!
//! A single-window eframe app: pick an input (file path, URL, or built-in
//! sample), watch the busy indicator while the scan runs on the worker
//! thread, then see the original and annotated images side by side with the
//! list of accepted results underneath.

use eframe::egui::{self, RichText};
use image::RgbImage;

use crate::acquire::ImageSource;
use crate::config::AppConfig;
use crate::session::worker::ScanWorker;
use crate::session::{Session, SessionEvent, SessionState};

const WARNING_COLOR: egui::Color32 = egui::Color32::from_rgb(230, 80, 80);
const INFO_COLOR: egui::Color32 = egui::Color32::from_rgb(120, 170, 255);

pub struct PlateScanApp {
    config: AppConfig,
    session: Session,
    worker: ScanWorker,
    path_input: String,
    url_input: String,
    selected_sample: usize,
    original_texture: Option<egui::TextureHandle>,
    annotated_texture: Option<egui::TextureHandle>,
}

impl PlateScanApp {
    pub fn new(config: AppConfig) -> Self {
        let worker = ScanWorker::spawn(config.clone());
        Self {
            config,
            session: Session::new(),
            worker,
            path_input: String::new(),
            url_input: String::new(),
            selected_sample: 0,
            original_texture: None,
            annotated_texture: None,
        }
    }

    /// Create eframe options for the main window
    pub fn options() -> eframe::NativeOptions {
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([1000.0, 720.0])
                .with_min_inner_size([640.0, 480.0])
                .with_title("PlateScan"),
            ..Default::default()
        }
    }

    fn start_scan(&mut self, source: ImageSource) {
        self.original_texture = None;
        self.annotated_texture = None;
        self.worker.request_scan(source.clone());
        self.session.apply(SessionEvent::SourceChosen(source));
    }

    /// Drain worker events; refresh the image textures when a scan lands.
    fn pump_events(&mut self, ctx: &egui::Context) {
        while let Some(event) = self.worker.poll() {
            self.session.apply(event);
            if let SessionState::Ready { report } = self.session.state() {
                self.original_texture =
                    Some(load_texture(ctx, "scan_original", &report.original));
                self.annotated_texture =
                    Some(load_texture(ctx, "scan_annotated", &report.annotated));
            }
        }
    }

    fn render_inputs(&mut self, ui: &mut egui::Ui) {
        let busy = self.session.is_busy();
        ui.add_enabled_ui(!busy, |ui| {
            ui.horizontal(|ui| {
                ui.label("File:");
                ui.add(
                    egui::TextEdit::singleline(&mut self.path_input)
                        .hint_text("/path/to/plate.jpg")
                        .desired_width(320.0),
                );
                if ui.button("Scan file").clicked() && !self.path_input.trim().is_empty() {
                    let path = std::path::PathBuf::from(self.path_input.trim());
                    self.start_scan(ImageSource::Upload(path));
                }
            });

            ui.horizontal(|ui| {
                ui.label("URL:");
                ui.add(
                    egui::TextEdit::singleline(&mut self.url_input)
                        .hint_text("https://example.com/plate.jpg")
                        .desired_width(320.0),
                );
                if ui.button("Scan URL").clicked() && !self.url_input.trim().is_empty() {
                    self.start_scan(ImageSource::Url(self.url_input.trim().to_string()));
                }
            });

            ui.horizontal(|ui| {
                ui.label("Sample:");
                let samples = &self.config.acquire.samples;
                if samples.is_empty() {
                    ui.label("none configured");
                } else {
                    self.selected_sample = self.selected_sample.min(samples.len() - 1);
                    egui::ComboBox::from_id_salt("sample_picker")
                        .selected_text(&samples[self.selected_sample].name)
                        .show_ui(ui, |ui| {
                            for (i, sample) in samples.iter().enumerate() {
                                ui.selectable_value(&mut self.selected_sample, i, &sample.name);
                            }
                        });
                    if ui.button("Scan sample").clicked() {
                        let name = samples[self.selected_sample].name.clone();
                        self.start_scan(ImageSource::Sample(name));
                    }
                }
            });

            if ui.button("Clear").clicked() {
                self.original_texture = None;
                self.annotated_texture = None;
                self.session.apply(SessionEvent::Cleared);
            }
        });
    }

    fn render_report(&self, ui: &mut egui::Ui) {
        let plan = self.session.display();
        let Some(report) = plan.report else { return };

        ui.horizontal_wrapped(|ui| {
            if let Some(texture) = &self.original_texture {
                ui.vertical(|ui| {
                    ui.label(RichText::new("Original").strong());
                    add_scaled_image(ui, texture);
                });
            }
            if let Some(texture) = &self.annotated_texture {
                ui.vertical(|ui| {
                    ui.label(RichText::new("Annotated").strong());
                    add_scaled_image(ui, texture);
                });
            }
        });

        ui.add_space(8.0);
        if !report.is_empty() {
            ui.label(RichText::new("Detected plates").strong());
            for result in &report.results {
                ui.label(format!(
                    "#{}  {}  (confidence {:.2})",
                    result.index, result.text, result.confidence
                ));
            }
        }
        ui.add_space(4.0);
        ui.label(
            RichText::new(format!("Scanned in {} ms", report.elapsed_ms))
                .small()
                .weak(),
        );
    }
}

impl eframe::App for PlateScanApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.pump_events(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("PlateScan");
            ui.label("License plate OCR with annotated output");
            ui.separator();

            self.render_inputs(ui);
            ui.separator();

            let plan = self.session.display();
            if let Some(busy) = &plan.busy {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label(busy);
                });
            }
            if let Some(warning) = plan.warning {
                ui.label(RichText::new(warning).color(WARNING_COLOR));
            }
            if let Some(info) = plan.info {
                ui.label(RichText::new(info).color(INFO_COLOR));
            }

            egui::ScrollArea::vertical().show(ui, |ui| {
                self.render_report(ui);
            });
        });

        // Keep polling for the worker's answer while a scan is in flight.
        if self.session.is_busy() {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }
    }
}

fn load_texture(ctx: &egui::Context, name: &str, image: &RgbImage) -> egui::TextureHandle {
    let size = [image.width() as usize, image.height() as usize];
    let color_image = egui::ColorImage::from_rgb(size, image.as_raw());
    ctx.load_texture(name, color_image, egui::TextureOptions::LINEAR)
}

/// Fit the texture into half the available width, keeping aspect ratio.
fn add_scaled_image(ui: &mut egui::Ui, texture: &egui::TextureHandle) {
    let tex_size = texture.size_vec2();
    let max_width = (ui.available_width() / 2.0 - 16.0).max(160.0);
    let scale = (max_width / tex_size.x).min(1.0);
    ui.add(egui::Image::new(texture).fit_to_exact_size(tex_size * scale));
}

/// Run the desktop application
pub fn run_app(config: AppConfig) -> Result<(), eframe::Error> {
    let app = PlateScanApp::new(config);
    eframe::run_native("PlateScan", PlateScanApp::options(), Box::new(|_cc| Ok(Box::new(app))))
}
