//! On-device smoke test for the hwcomposer bridge
//! Opens the composer, prints what it found, and drives a few hundred
//! empty composition passes to prove the present loop works.

use std::time::Duration;

use hwcomposer_bridge::hybris::{create_backend, SharedBackend};
use hwcomposer_bridge::{Config, HwcContext};

fn main() {
    // Use try_init in case LD_PRELOAD already set a subscriber up.
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    println!("=== hwcomposer bridge smoke test ===");

    let config = Config::from_env();
    let (backend, _relay) = match create_backend(&config, Box::new(|_| {})) {
        Ok(result) => result,
        Err(e) => {
            println!("Failed to open the composer: {}", e);
            std::process::exit(1);
        }
    };

    let shared = SharedBackend::new(backend);
    let mut context = HwcContext::new(shared.clone(), config.clone());

    let (width, height) = context.screen_size();
    let (physical_width, physical_height) = context.physical_screen_size();
    println!("Display initialized!");
    println!("  Resolution: {}x{}", width, height);
    println!("  Refresh rate: {:.1} Hz", context.refresh_rate());
    println!(
        "  Physical size: {:.0}mm x {:.0}mm",
        physical_width, physical_height
    );

    let handle = match context.create_native_window() {
        Ok(handle) => handle,
        Err(e) => {
            println!("Failed to create the composition surface: {}", e);
            std::process::exit(1);
        }
    };

    let window = match shared.create_native_window(
        width as u32,
        height as u32,
        context.config().buffer_count,
    ) {
        Some(window) => window,
        None => {
            println!("Failed to create the native window");
            std::process::exit(1);
        }
    };
    println!(
        "Native window ready at {:p}; pass it to eglCreateWindowSurface",
        window.as_ptr()
    );
    println!("Pumping the scheduler for ~3 seconds...");

    // Without a GL stack in this binary nothing renders, but the
    // scheduler, vsync delivery, and power paths all get exercised.
    for i in 0..180 {
        context.dispatch_events(Some(Duration::from_millis(1)));
        context.request_update(1);
        std::thread::sleep(Duration::from_millis(16));
        if i == 90 {
            println!("Toggling the display off and on...");
            context.platform_resource("displayoff");
            std::thread::sleep(Duration::from_millis(200));
            context.platform_resource("displayon");
        }
    }

    context.destroy_native_window(handle);
    println!("Done.");
}
