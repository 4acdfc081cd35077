use lumen_core::hash::hash_channel;
use lumen_core::{Film, HardwareConfig, PipelineScaleConfig, RadianceChannelScale};
use lumen_hw::reference;
use lumen_hw::{FilmHardware, KernelSource};

fn start(film: &Film) -> FilmHardware {
    FilmHardware::with_device(&reference::description(), film, &KernelSource::builtin())
        .expect("reference device setup should succeed")
}

fn merge(film: &mut Film, pipeline_index: usize) -> Vec<f32> {
    let mut hw = start(film);
    assert!(hw.merge(film, pipeline_index).expect("merge should succeed"));
    film.image_pipeline(pipeline_index).unwrap().pixels().to_vec()
}

/// W=4, H=1 film with one per-pixel-normalized group holding
/// (1,1,1)..(4,4,4) at weight 1.
fn ramp_film() -> Film {
    let mut film = Film::new(4, 1).with_radiance_per_pixel_normalized(1);
    let channel = film.radiance_per_pixel_normalized_mut(0).unwrap();
    for x in 0..4 {
        let v = (x + 1) as f32;
        channel.set_pixel(x, 0, &[v, v, v, 1.0]);
    }
    film
}

fn fill_per_pixel(film: &mut Film, group: usize, rgb: [f32; 3], weight: f32) {
    let channel = film.radiance_per_pixel_normalized_mut(group).unwrap();
    for px in channel.pixels_mut().chunks_mut(4) {
        px.copy_from_slice(&[rgb[0], rgb[1], rgb[2], weight]);
    }
}

fn fill_per_screen(film: &mut Film, group: usize, rgb: [f32; 3]) {
    let channel = film.radiance_per_screen_normalized_mut(group).unwrap();
    for px in channel.pixels_mut().chunks_mut(3) {
        px.copy_from_slice(&rgb);
    }
}

#[test]
fn test_unit_scale_reproduces_input() {
    let mut film = ramp_film();
    let out = merge(&mut film, 0);
    assert_eq!(out, vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 4.0, 4.0, 4.0]);
}

#[test]
fn test_red_only_scale() {
    let mut film = ramp_film().with_pipeline_scales(vec![PipelineScaleConfig::new(vec![
        RadianceChannelScale::new(true, [0.5, 0.0, 0.0]),
    ])]);
    let out = merge(&mut film, 0);
    assert_eq!(out, vec![0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 1.5, 0.0, 0.0, 2.0, 0.0, 0.0]);
}

#[test]
fn test_conformance_hashes() {
    let mut film = ramp_film();
    merge(&mut film, 0);
    assert_eq!(
        hash_channel(film.image_pipeline(0).unwrap()).to_hex(),
        "c6e2adb8937f9bf875c03b508b2eedb3bb39d7d8d5663608f5e26557ff7da2a3"
    );

    let mut film = ramp_film().with_pipeline_scales(vec![PipelineScaleConfig::new(vec![
        RadianceChannelScale::new(true, [0.5, 0.0, 0.0]),
    ])]);
    merge(&mut film, 0);
    assert_eq!(
        hash_channel(film.image_pipeline(0).unwrap()).to_hex(),
        "89c6f8c4df1d6bcccb01f050fd93407bc69da2f9f0e79a23a79d626b68aac05d"
    );
}

#[test]
fn test_per_pixel_divides_by_weight() {
    let mut film = Film::new(3, 2).with_radiance_per_pixel_normalized(1);
    fill_per_pixel(&mut film, 0, [8.0, 4.0, 2.0], 4.0);
    let out = merge(&mut film, 0);
    for px in out.chunks(3) {
        assert_eq!(px, &[2.0, 1.0, 0.5]);
    }
}

#[test]
fn test_zero_weight_pixels_stay_black() {
    let mut film = Film::new(2, 1).with_radiance_per_pixel_normalized(1);
    film.radiance_per_pixel_normalized_mut(0)
        .unwrap()
        .set_pixel(0, 0, &[5.0, 5.0, 5.0, 0.0]);
    film.radiance_per_pixel_normalized_mut(0)
        .unwrap()
        .set_pixel(1, 0, &[6.0, 6.0, 6.0, 2.0]);
    let out = merge(&mut film, 0);
    assert_eq!(out, vec![0.0, 0.0, 0.0, 3.0, 3.0, 3.0]);
}

#[test]
fn test_no_radiance_output_is_cleared() {
    let mut film = Film::new(5, 3);
    film.image_pipeline_mut(0).unwrap().pixels_mut().fill(0.25);
    let out = merge(&mut film, 0);
    assert!(out.iter().all(|&v| v == 0.0));
}

#[test]
fn test_all_groups_disabled_equals_zero_groups() {
    let mut disabled = Film::new(4, 2)
        .with_radiance_per_pixel_normalized(3)
        .with_radiance_per_screen_normalized(3)
        .with_pipeline_scales(vec![PipelineScaleConfig::all_disabled(3)]);
    for g in 0..3 {
        fill_per_pixel(&mut disabled, g, [1.0, 2.0, 3.0], 1.0);
        fill_per_screen(&mut disabled, g, [4.0, 5.0, 6.0]);
    }
    let mut empty = Film::new(4, 2);

    assert_eq!(merge(&mut disabled, 0), merge(&mut empty, 0));
}

#[test]
fn test_groups_accumulate_additively() {
    let mut film = Film::new(2, 2).with_radiance_per_pixel_normalized(3);
    fill_per_pixel(&mut film, 0, [1.0, 0.0, 0.0], 1.0);
    fill_per_pixel(&mut film, 1, [0.0, 2.0, 0.0], 1.0);
    fill_per_pixel(&mut film, 2, [0.0, 0.0, 4.0], 2.0);
    let out = merge(&mut film, 0);
    for px in out.chunks(3) {
        assert_eq!(px, &[1.0, 2.0, 2.0]);
    }
}

#[test]
fn test_disabled_group_contributes_nothing() {
    let mut film = Film::new(2, 1)
        .with_radiance_per_pixel_normalized(2)
        .with_pipeline_scales(vec![PipelineScaleConfig::new(vec![
            RadianceChannelScale::NEUTRAL,
            RadianceChannelScale::new(false, [1.0, 1.0, 1.0]),
        ])]);
    fill_per_pixel(&mut film, 0, [1.0, 1.0, 1.0], 1.0);
    fill_per_pixel(&mut film, 1, [100.0, 100.0, 100.0], 1.0);
    let out = merge(&mut film, 0);
    assert!(out.iter().all(|&v| v == 1.0));
}

#[test]
fn test_no_residue_between_groups() {
    // Group 1 has zero weight everywhere: if group 0's scratch contents
    // leaked into it, the output would double.
    let mut film = Film::new(2, 2).with_radiance_per_pixel_normalized(2);
    fill_per_pixel(&mut film, 0, [3.0, 3.0, 3.0], 1.0);
    fill_per_pixel(&mut film, 1, [0.0, 0.0, 0.0], 0.0);
    let out = merge(&mut film, 0);
    assert!(out.iter().all(|&v| v == 3.0));
}

#[test]
fn test_per_screen_factor_applied() {
    let mut film = Film::new(4, 1).with_radiance_per_screen_normalized(1);
    film.radiance_per_screen_normalized_mut(0)
        .unwrap()
        .pixels_mut()
        .copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
    film.sample_counts.add_per_screen_normalized(8.0);
    let out = merge(&mut film, 0);
    assert_eq!(out, vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 5.0, 5.5, 6.0]);
}

#[test]
fn test_per_screen_without_samples_uses_unit_factor() {
    let mut film = Film::new(2, 1).with_radiance_per_screen_normalized(1);
    fill_per_screen(&mut film, 0, [0.75, 1.5, 3.0]);
    let out = merge(&mut film, 0);
    assert_eq!(out, vec![0.75, 1.5, 3.0, 0.75, 1.5, 3.0]);
}

#[test]
fn test_both_radiance_kinds_combine() {
    let mut film = Film::new(2, 1)
        .with_radiance_per_pixel_normalized(1)
        .with_radiance_per_screen_normalized(1)
        .with_pipeline_scales(vec![PipelineScaleConfig::new(vec![
            RadianceChannelScale::new(true, [2.0, 2.0, 2.0]),
        ])]);
    fill_per_pixel(&mut film, 0, [1.0, 1.0, 1.0], 1.0);
    fill_per_screen(&mut film, 0, [1.0, 1.0, 1.0]);
    film.sample_counts.add_per_screen_normalized(4.0);
    // per-pixel: 1 * 2; per-screen: 1 * (2 / 4) * 2
    let out = merge(&mut film, 0);
    assert!(out.iter().all(|&v| v == 3.0));
}

#[test]
fn test_non_finite_values_are_cleared() {
    let mut film = Film::new(3, 1).with_radiance_per_screen_normalized(1);
    film.radiance_per_screen_normalized_mut(0)
        .unwrap()
        .pixels_mut()
        .copy_from_slice(&[f32::NAN, 1.0, f32::INFINITY, 2.0, f32::NEG_INFINITY, 3.0, 4.0, 5.0, 6.0]);
    let out = merge(&mut film, 0);
    assert_eq!(out, vec![0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_merge_is_deterministic() {
    let mut film = Film::new(16, 9)
        .with_radiance_per_pixel_normalized(2)
        .with_radiance_per_screen_normalized(2);
    for g in 0..2 {
        let channel = film.radiance_per_pixel_normalized_mut(g).unwrap();
        for (i, v) in channel.pixels_mut().iter_mut().enumerate() {
            *v = ((i * 7 + g * 13) % 17) as f32 * 0.37 + 0.01;
        }
        let channel = film.radiance_per_screen_normalized_mut(g).unwrap();
        for (i, v) in channel.pixels_mut().iter_mut().enumerate() {
            *v = ((i * 5 + g) % 11) as f32 * 0.19;
        }
    }
    film.sample_counts.add_per_screen_normalized(37.0);

    let mut hw = start(&film);
    let mut first = film.clone();
    let mut second = film.clone();
    hw.merge(&mut first, 0).unwrap();
    hw.merge(&mut second, 0).unwrap();
    assert_eq!(
        hash_channel(first.image_pipeline(0).unwrap()),
        hash_channel(second.image_pipeline(0).unwrap())
    );
}

#[test]
fn test_out_of_range_pipeline_config_is_neutral() {
    let mut film = Film::new(2, 1)
        .with_image_pipelines(2)
        .with_radiance_per_pixel_normalized(1)
        .with_pipeline_scales(vec![PipelineScaleConfig::all_disabled(1)]);
    fill_per_pixel(&mut film, 0, [1.0, 2.0, 3.0], 1.0);
    let mut hw = start(&film);

    hw.merge(&mut film, 0).unwrap();
    assert!(film.image_pipeline(0).unwrap().pixels().iter().all(|&v| v == 0.0));

    // Pipeline 1 has no scale entry and merges with the neutral configuration.
    hw.merge(&mut film, 1).unwrap();
    assert_eq!(film.image_pipeline(1).unwrap().pixels(), &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
}

#[test]
fn test_missing_pipeline_channel_is_an_error() {
    let mut film = Film::new(2, 1);
    let mut hw = start(&film);
    assert!(hw.merge(&mut film, 3).is_err());
    // The device is still usable afterwards.
    assert!(hw.merge(&mut film, 0).unwrap());
}

#[test]
fn test_large_film_spans_many_work_groups() {
    let mut film = Film::new(301, 7).with_radiance_per_pixel_normalized(1);
    fill_per_pixel(&mut film, 0, [1.0, 0.5, 0.25], 1.0);
    let out = merge(&mut film, 0);
    assert_eq!(out.len(), 301 * 7 * 3);
    for px in out.chunks(3) {
        assert_eq!(px, &[1.0, 0.5, 0.25]);
    }
}

#[test]
fn test_disabled_hardware_merge_is_noop() {
    let mut film = ramp_film();
    film.image_pipeline_mut(0).unwrap().pixels_mut().fill(9.0);
    let config = HardwareConfig {
        enable: false,
        device_index: None,
    };
    let mut hw = FilmHardware::start(&config, &film, &KernelSource::builtin()).unwrap();
    assert!(!hw.is_active());
    assert!(!hw.merge(&mut film, 0).unwrap());
    assert!(film.image_pipeline(0).unwrap().pixels().iter().all(|&v| v == 9.0));
}

#[test]
fn test_auxiliary_upload_leaves_merge_unchanged() {
    let mut film = ramp_film().with_alpha().with_object_id();
    film.alpha_mut().unwrap().pixels_mut().fill(0.25);
    film.object_id_mut().unwrap().pixels_mut().fill(42);
    let mut hw = start(&film);
    assert!(hw.write_all_buffers(&film).unwrap());
    assert!(hw.merge(&mut film, 0).unwrap());
    let out = film.image_pipeline(0).unwrap().pixels().to_vec();
    assert_eq!(out, vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 4.0, 4.0, 4.0]);
}
