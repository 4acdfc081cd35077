//! wgpu backend checked against the host reference device.
//!
//! Run with `cargo test -p lumen-hw -- --ignored` on a machine with a GPU.

use lumen_core::{Film, PipelineScaleConfig, RadianceChannelScale};
use lumen_hw::{filter_hardware, gpu, reference, select_device};
use lumen_hw::{DeviceDescription, FilmHardware, KernelSource};

fn hardware_device() -> DeviceDescription {
    let instance = gpu::create_instance();
    let devices = filter_hardware(gpu::describe_adapters(&instance));
    select_device(&devices, None, true).expect("no hardware adapter available")
}

fn sample_film(width: u32, height: u32) -> Film {
    let mut film = Film::new(width, height)
        .with_radiance_per_pixel_normalized(2)
        .with_radiance_per_screen_normalized(1)
        .with_pipeline_scales(vec![PipelineScaleConfig::new(vec![
            RadianceChannelScale::new(true, [1.0, 0.5, 0.25]),
            RadianceChannelScale::new(true, [2.0, 2.0, 2.0]),
        ])]);
    for g in 0..2 {
        let channel = film.radiance_per_pixel_normalized_mut(g).unwrap();
        for (i, px) in channel.pixels_mut().chunks_mut(4).enumerate() {
            let v = (i % 64) as f32;
            px.copy_from_slice(&[v, v * 0.5, 1.0, if i % 3 == 0 { 0.0 } else { 2.0 }]);
        }
    }
    let channel = film.radiance_per_screen_normalized_mut(0).unwrap();
    for (i, v) in channel.pixels_mut().iter_mut().enumerate() {
        *v = (i % 8) as f32 * 0.125;
    }
    film.sample_counts.add_per_screen_normalized((width * height) as f64 * 4.0);
    film
}

fn merged(description: &DeviceDescription, mut film: Film) -> Vec<f32> {
    let mut hw = FilmHardware::with_device(description, &film, &KernelSource::builtin())
        .expect("setup should succeed");
    assert!(hw.merge(&mut film, 0).expect("merge should succeed"));
    film.image_pipeline(0).unwrap().pixels().to_vec()
}

#[test]
#[ignore = "requires a GPU adapter"]
fn test_gpu_matches_reference() {
    let film = sample_film(64, 48);
    let gpu_out = merged(&hardware_device(), film.clone());
    let ref_out = merged(&reference::description(), film);
    assert_eq!(gpu_out.len(), ref_out.len());
    for (i, (g, r)) in gpu_out.iter().zip(&ref_out).enumerate() {
        // Drivers may fuse the multiply-adds.
        assert!((g - r).abs() <= 1e-5 * r.abs().max(1.0), "element {i}: {g} vs {r}");
    }
}

#[test]
#[ignore = "requires a GPU adapter"]
fn test_gpu_folds_large_dispatches() {
    // 4096 x 4200 pixels need more than 65535 groups of 256.
    let mut film = Film::new(4096, 4200).with_radiance_per_screen_normalized(1);
    film.radiance_per_screen_normalized_mut(0)
        .unwrap()
        .pixels_mut()
        .fill(0.5);
    let out = merged(&hardware_device(), film);
    assert!(out.iter().all(|&v| v == 0.5));
}

#[test]
#[ignore = "requires a GPU adapter"]
fn test_gpu_teardown_releases_memory() {
    let film = sample_film(32, 32);
    let hw = FilmHardware::with_device(&hardware_device(), &film, &KernelSource::builtin())
        .expect("setup should succeed");
    assert!(hw.used_memory() > 0);
    hw.stop();
}
