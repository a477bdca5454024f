#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

fn main() {
    metallograph_desktop_lib::run()
}
