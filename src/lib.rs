pub mod call;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod signaling;
pub mod utils;

#[cfg(feature = "desktop")]
mod commands;

#[cfg(test)]
mod testing;

pub use call::{CallOrchestrator, CallSnapshot, CallState, EndReason, Role};
pub use config::CallConfig;
pub use error::CallError;

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    logger::init();
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .manage(commands::CallHost::default())
        .invoke_handler(tauri::generate_handler![
            // Relay и состояние
            commands::call_api::connect,
            commands::call_api::disconnect,
            commands::call_api::call_state,
            // Звонок
            commands::call_api::place_call,
            commands::call_api::accept_incoming,
            commands::call_api::reject_incoming,
            commands::call_api::hangup,
            // Устройства
            commands::call_api::toggle_microphone,
            commands::call_api::toggle_camera,
            commands::call_api::switch_camera,
            commands::call_api::list_devices,
            commands::call_api::switch_device,
            commands::device_api::register_capture_device,
            commands::device_api::remove_capture_device,
            commands::device_api::set_capture_permission,
            commands::device_api::push_capture_frame,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
