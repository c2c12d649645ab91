//! Time-of-day sky, sun and weather simulation.
//!
//! [`AtmosphereState`] is plain data and compares by value. [`Atmosphere`]
//! owns the state plus the RNG that drives weather transitions, and keeps the
//! rain/snow exclusivity invariant: the only way to turn either on is through
//! methods that turn the other off.

use crate::color::smoothstep;
use crate::uniforms::AtmosphereUniform;
use glam::{Vec2, Vec3};
use noise::{NoiseFn, Perlin, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};
use std::fmt;

/// Offset applied to `sin(hour angle)` when deriving the sun azimuth.
const AZIMUTH_OFFSET: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunState {
    /// Unit vector from the ground toward the sun.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Angular radius of the disk in radians.
    pub angular_radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudState {
    pub enabled: bool,
    pub coverage: f32,
    pub density: f32,
    /// 0..1; crossing the weather threshold starts rain or snow.
    pub precipitation: f32,
    /// Accumulated drift of the cloud layer.
    pub offset: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RainState {
    pub enabled: bool,
    pub intensity: f32,
    pub speed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnowState {
    pub enabled: bool,
    pub intensity: f32,
    pub flake_size: f32,
    pub speed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FogState {
    pub enabled: bool,
    pub density: f32,
    pub color: Vec3,
    pub height_falloff: f32,
    /// Height at which `density` applies.
    pub base_height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindState {
    pub speed: f32,
    pub direction: Vec2,
    pub turbulence: f32,
}

/// Physical scattering constants (metres).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatteringParams {
    pub rayleigh: Vec3,
    pub mie: f32,
    pub rayleigh_scale_height: f32,
    pub mie_scale_height: f32,
    /// Mie phase asymmetry.
    pub mie_g: f32,
    pub planet_radius: f32,
    pub atmosphere_radius: f32,
}

impl Default for ScatteringParams {
    fn default() -> Self {
        Self {
            rayleigh: Vec3::new(5.8e-6, 13.5e-6, 33.1e-6),
            mie: 21e-6,
            rayleigh_scale_height: 8.0e3,
            mie_scale_height: 1.2e3,
            mie_g: 0.76,
            planet_radius: 6.371e6,
            atmosphere_radius: 6.471e6,
        }
    }
}

/// Seeded noise fields for the CPU sky: Perlin clouds and a value-noise star field.
#[derive(Clone)]
pub struct SkyNoise {
    seed: u32,
    clouds: Perlin,
    stars: Value,
}

impl SkyNoise {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            clouds: Perlin::new(seed),
            stars: Value::new(seed.wrapping_add(1)),
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Two-octave cloud density in [0, 1].
    pub fn cloud(&self, p: Vec2) -> f32 {
        let octave = |scale: f64| self.clouds.get([p.x as f64 * scale, p.y as f64 * scale]);
        let n = 0.65 * octave(1.0) + 0.35 * octave(2.3);
        ((n * 0.5 + 0.5) as f32).clamp(0.0, 1.0)
    }

    /// Star brightness in [0, 1]; only the top of the range reads as a star.
    pub fn star(&self, p: Vec2) -> f32 {
        ((self.stars.get([p.x as f64, p.y as f64]) * 0.5 + 0.5) as f32).clamp(0.0, 1.0)
    }
}

impl PartialEq for SkyNoise {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed
    }
}

impl fmt::Debug for SkyNoise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkyNoise").field("seed", &self.seed).finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtmosphereState {
    /// Hours, always in [0, 24).
    pub time_of_day: f32,
    /// Simulated seconds per real second.
    pub time_scale: f32,
    pub sun: SunState,
    pub moon_direction: Vec3,
    pub moon_intensity: f32,
    pub star_intensity: f32,
    pub clouds: CloudState,
    pub rain: RainState,
    pub snow: SnowState,
    pub fog: FogState,
    pub wind: WindState,
    pub scattering: ScatteringParams,
    /// Precipitation above which rain or snow starts.
    pub precipitation_threshold: f32,
    /// Chance that new precipitation falls as snow.
    pub snow_probability: f32,
    pub sky_noise: SkyNoise,
}

impl Default for AtmosphereState {
    fn default() -> Self {
        let mut state = Self {
            time_of_day: 12.0,
            time_scale: 1.0,
            sun: SunState {
                direction: Vec3::Y,
                color: Vec3::ONE,
                intensity: 1.0,
                angular_radius: 0.00935,
            },
            moon_direction: Vec3::NEG_Y,
            moon_intensity: 0.1,
            star_intensity: 1.0,
            clouds: CloudState {
                enabled: true,
                coverage: 0.3,
                density: 0.5,
                precipitation: 0.0,
                offset: Vec2::ZERO,
            },
            rain: RainState {
                enabled: false,
                intensity: 0.0,
                speed: 5.0,
            },
            snow: SnowState {
                enabled: false,
                intensity: 0.0,
                flake_size: 0.05,
                speed: 1.0,
            },
            fog: FogState {
                enabled: true,
                density: 0.01,
                color: Vec3::new(0.7, 0.8, 1.0),
                height_falloff: 0.2,
                base_height: 0.0,
            },
            wind: WindState {
                speed: 5.0,
                direction: Vec2::new(1.0, 0.0),
                turbulence: 0.2,
            },
            scattering: ScatteringParams::default(),
            precipitation_threshold: 0.5,
            snow_probability: 0.3,
            sky_noise: SkyNoise::new(0),
        };
        state.derive_sun();
        state
    }
}

impl AtmosphereState {
    /// Recompute sun and moon from `time_of_day`.
    ///
    /// The hour angle is measured from solar noon, so the sun peaks at 12:00
    /// and is below the horizon at midnight.
    pub fn derive_sun(&mut self) {
        let angle = (self.time_of_day / 24.0 - 0.5) * TAU;
        let zenith = angle.cos();
        let azimuth = angle.sin() * AZIMUTH_OFFSET;
        let direction = Vec3::new(
            azimuth.sin() * zenith.cos(),
            zenith.sin(),
            azimuth.cos() * zenith.cos(),
        )
        .normalize();
        let elevation = direction.y;

        self.sun.direction = direction;
        self.sun.color = Vec3::new(1.0, 0.6, 0.4).lerp(Vec3::ONE, (elevation.max(0.0) * 2.0).min(1.0));
        self.sun.intensity = (elevation * 1.5 + 0.2).max(0.0);
        self.moon_direction = -direction;
    }

    pub fn is_raining(&self) -> bool {
        self.rain.enabled
    }

    pub fn is_snowing(&self) -> bool {
        self.snow.enabled
    }

    /// Fraction of light scattered out by height fog between two points.
    pub fn fog_amount(&self, position: Vec3, camera_position: Vec3) -> f32 {
        if !self.fog.enabled || self.fog.density <= 0.0 {
            return 0.0;
        }
        let distance = position.distance(camera_position);
        let falloff = self.fog.height_falloff.max(1e-4);
        let camera_density =
            self.fog.density * (-falloff * (camera_position.y - self.fog.base_height)).exp();
        let dh = position.y - camera_position.y;
        // Closed-form integral of the exponential density along the ray.
        let integral = if (falloff * dh).abs() > 1e-4 {
            (1.0 - (-falloff * dh).exp()) / (falloff * dh)
        } else {
            1.0
        };
        (1.0 - (-camera_density * integral * distance).exp()).clamp(0.0, 1.0)
    }

    /// Fog colour lit by the current sun.
    pub fn fog_color(&self) -> Vec3 {
        self.fog.color * (self.sun.intensity * 0.6 + 0.05) * self.sun.color.lerp(Vec3::ONE, 0.5)
    }

    pub fn apply_fog(&self, color: Vec3, position: Vec3, camera_position: Vec3) -> Vec3 {
        color.lerp(self.fog_color(), self.fog_amount(position, camera_position))
    }

    /// Background radiance along a view direction.
    pub fn sky_radiance(&self, view_dir: Vec3) -> Vec3 {
        let d = view_dir.try_normalize().unwrap_or(Vec3::Y);
        let sun = self.sun.direction;
        let sun_dot = d.dot(sun).max(0.0);

        let rayleigh = 3.0 / (8.0 * PI) * (1.0 + sun_dot * sun_dot);
        let g = self.scattering.mie_g;
        let mie = (1.0 - g * g) / (4.0 * PI * (1.0 + g * g - 2.0 * g * sun_dot).powf(1.5));
        let tint = Vec3::new(0.3, 0.6, 1.0).lerp(Vec3::new(1.0, 0.7, 0.4), smoothstep(0.0, 1.0, -sun.y * 0.5 + 0.5));
        let disk = smoothstep(self.sun.angular_radius, 0.0, sun_dot.min(1.0).acos());

        let mut color =
            (tint * rayleigh + self.sun.color * mie + self.sun.color * disk * 10.0) * self.sun.intensity;

        // Night sky: moon glow and stars fade in as the sun sets.
        let night = 1.0 - self.sun.intensity.min(1.0);
        let moon_dot = d.dot(self.moon_direction).max(0.0);
        color += Vec3::new(0.02, 0.03, 0.06) * self.moon_intensity * (1.0 + 4.0 * moon_dot.powi(32)) * night;
        if d.y > 0.0 {
            let star = self.sky_noise.star(Vec2::new(d.x, d.z) / (d.y + 0.2) * 180.0);
            color += Vec3::splat(smoothstep(0.985, 1.0, star) * self.star_intensity * night);
        }

        if self.clouds.enabled && d.y > 0.0 {
            let p = Vec2::new(d.x, d.z) / (d.y + 0.1) * 2.0 + self.clouds.offset * 0.01;
            let n = self.sky_noise.cloud(p);
            let amount = smoothstep(1.0 - self.clouds.coverage, 1.0, n)
                * self.clouds.density
                * smoothstep(0.0, 0.2, d.y);
            let lit = self.sun.color * (self.sun.intensity * 0.8) + Vec3::splat(0.05);
            color = color.lerp(lit, amount.clamp(0.0, 1.0));
        }

        let rain = if self.rain.enabled { self.rain.intensity } else { 0.0 };
        let snow = if self.snow.enabled { self.snow.intensity } else { 0.0 };
        color *= 1.0 - rain.max(snow) * 0.5;

        // Below the horizon blend toward a dim ground colour.
        let ground = self.fog_color() * 0.3;
        color.lerp(ground, smoothstep(0.0, -0.1, d.y))
    }

    /// Pack for `lighting.wgsl` and `skybox.wgsl`.
    pub fn uniform(&self) -> AtmosphereUniform {
        AtmosphereUniform {
            sun_direction: self.sun.direction.extend(self.sun.intensity).to_array(),
            sun_color: self.sun.color.extend(self.sun.angular_radius).to_array(),
            moon_direction: self.moon_direction.extend(self.moon_intensity).to_array(),
            fog_color: self.fog_color().extend(if self.fog.enabled { self.fog.density } else { 0.0 }).to_array(),
            fog_params: [
                self.fog.height_falloff,
                self.fog.base_height,
                self.time_of_day,
                self.star_intensity,
            ],
            clouds: [
                if self.clouds.enabled { self.clouds.coverage } else { 0.0 },
                self.clouds.density,
                self.clouds.offset.x,
                self.clouds.offset.y,
            ],
            weather: [
                if self.rain.enabled { self.rain.intensity } else { 0.0 },
                if self.snow.enabled { self.snow.intensity } else { 0.0 },
                self.wind.speed,
                self.wind.turbulence,
            ],
            scattering: [
                self.scattering.mie_g,
                self.scattering.rayleigh_scale_height,
                self.scattering.mie_scale_height,
                self.scattering.planet_radius,
            ],
        }
    }
}

/// Owns the atmosphere state and the weather RNG.
#[derive(Debug, Clone)]
pub struct Atmosphere {
    state: AtmosphereState,
    rng: StdRng,
}

impl Atmosphere {
    /// Default state with weather and sky noise both seeded from `seed`.
    pub fn new(seed: u64) -> Self {
        let state = AtmosphereState {
            sky_noise: SkyNoise::new(seed as u32),
            ..AtmosphereState::default()
        };
        Self::with_state(state, seed)
    }

    pub fn with_state(mut state: AtmosphereState, seed: u64) -> Self {
        state.time_of_day = state.time_of_day.rem_euclid(24.0);
        state.derive_sun();
        if state.rain.enabled && state.snow.enabled {
            state.snow.enabled = false;
        }
        Self {
            state,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn state(&self) -> &AtmosphereState {
        &self.state
    }

    /// Advance simulated time by `dt` seconds and re-derive dependent values.
    ///
    /// `dt = 0` leaves the state untouched.
    pub fn update(&mut self, dt: f32) {
        let state = &mut self.state;
        state.time_of_day = (state.time_of_day + dt * state.time_scale / 3600.0).rem_euclid(24.0);
        state.derive_sun();
        if dt <= 0.0 {
            return;
        }

        let drift = state.wind.direction * state.wind.speed * 0.01;
        state.clouds.offset += drift * dt;

        if state.clouds.precipitation > state.precipitation_threshold {
            if !state.rain.enabled && !state.snow.enabled {
                let intensity = state.clouds.precipitation;
                if self.rng.gen::<f32>() < state.snow_probability {
                    self.enable_snow(intensity);
                } else {
                    self.enable_rain(intensity);
                }
            }
        } else {
            self.clear_precipitation();
        }
    }

    pub fn set_time_of_day(&mut self, hours: f32) {
        self.state.time_of_day = hours.rem_euclid(24.0);
        self.state.derive_sun();
    }

    pub fn set_time_scale(&mut self, scale: f32) {
        self.state.time_scale = scale;
    }

    pub fn set_precipitation(&mut self, amount: f32) {
        self.state.clouds.precipitation = amount.clamp(0.0, 1.0);
    }

    pub fn set_clouds(&mut self, enabled: bool, coverage: f32, density: f32) {
        self.state.clouds.enabled = enabled;
        self.state.clouds.coverage = coverage.clamp(0.0, 1.0);
        self.state.clouds.density = density.clamp(0.0, 1.0);
    }

    pub fn set_fog(&mut self, fog: FogState) {
        self.state.fog = fog;
    }

    pub fn set_wind(&mut self, speed: f32, direction: Vec2) {
        self.state.wind.speed = speed;
        self.state.wind.direction = direction.try_normalize().unwrap_or(Vec2::X);
    }

    /// Start rain; stops any snow.
    pub fn enable_rain(&mut self, intensity: f32) {
        self.state.snow.enabled = false;
        self.state.snow.intensity = 0.0;
        self.state.rain.enabled = true;
        self.state.rain.intensity = intensity.clamp(0.0, 1.0);
    }

    /// Start snow; stops any rain.
    pub fn enable_snow(&mut self, intensity: f32) {
        self.state.rain.enabled = false;
        self.state.rain.intensity = 0.0;
        self.state.snow.enabled = true;
        self.state.snow.intensity = intensity.clamp(0.0, 1.0);
    }

    pub fn clear_precipitation(&mut self) {
        self.state.rain.enabled = false;
        self.state.snow.enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn zero_dt_update_is_idempotent() {
        let mut atmosphere = Atmosphere::new(7);
        atmosphere.set_precipitation(0.9);
        atmosphere.set_time_of_day(17.3);
        let before = atmosphere.state().clone();
        atmosphere.update(0.0);
        assert_eq!(atmosphere.state(), &before);
        atmosphere.update(0.0);
        assert_eq!(atmosphere.state(), &before);
    }

    #[test]
    fn rain_and_snow_are_never_both_enabled() {
        let mut atmosphere = Atmosphere::new(42);
        let mut driver = StdRng::seed_from_u64(99);
        for _ in 0..5000 {
            match driver.gen_range(0..5) {
                0 => atmosphere.set_precipitation(driver.gen()),
                1 => atmosphere.enable_rain(driver.gen()),
                2 => atmosphere.enable_snow(driver.gen()),
                _ => atmosphere.update(driver.gen_range(0.0..120.0)),
            }
            let s = atmosphere.state();
            assert!(!(s.is_raining() && s.is_snowing()));
        }
    }

    #[test]
    fn heavy_precipitation_starts_exactly_one_kind() {
        let mut atmosphere = Atmosphere::new(3);
        atmosphere.set_precipitation(0.8);
        atmosphere.update(1.0);
        let s = atmosphere.state();
        assert!(s.is_raining() ^ s.is_snowing());
        let intensity = if s.is_raining() { s.rain.intensity } else { s.snow.intensity };
        assert!((intensity - 0.8).abs() < 1e-6);

        atmosphere.set_precipitation(0.1);
        atmosphere.update(1.0);
        assert!(!atmosphere.state().is_raining() && !atmosphere.state().is_snowing());
    }

    #[test]
    fn snow_share_follows_probability() {
        let mut snow = 0;
        for seed in 0..400 {
            let mut atmosphere = Atmosphere::new(seed);
            atmosphere.set_precipitation(1.0);
            atmosphere.update(1.0);
            if atmosphere.state().is_snowing() {
                snow += 1;
            }
        }
        // 30% nominal.
        assert!((70..170).contains(&snow), "snow count {snow}");
    }

    #[test]
    fn noon_sun_is_high_and_white() {
        let mut atmosphere = Atmosphere::new(0);
        atmosphere.set_time_of_day(12.0);
        let sun = atmosphere.state().sun;
        assert!(sun.direction.y > 0.8);
        assert!((sun.color - Vec3::ONE).length() < 1e-5);
        assert!((sun.intensity - (sun.direction.y * 1.5 + 0.2)).abs() < 1e-6);
    }

    #[test]
    fn sunrise_is_warm_and_midnight_is_dark() {
        let mut atmosphere = Atmosphere::new(0);
        atmosphere.set_time_of_day(6.0);
        let sunrise = atmosphere.state().sun;
        assert!(sunrise.direction.y.abs() < 1e-4);
        assert!(sunrise.color.z < 0.5);
        assert!((sunrise.intensity - 0.2).abs() < 1e-3);

        atmosphere.set_time_of_day(0.0);
        assert_eq!(atmosphere.state().sun.intensity, 0.0);
        let s = atmosphere.state();
        assert!((s.moon_direction + s.sun.direction).length() < 1e-6);
    }

    #[test]
    fn time_advances_in_hours_and_wraps() {
        let mut atmosphere = Atmosphere::new(0);
        atmosphere.set_time_of_day(23.5);
        atmosphere.set_time_scale(60.0);
        atmosphere.update(60.0);
        // 60 s at 60x is one hour.
        assert!((atmosphere.state().time_of_day - 0.5).abs() < 1e-3);
    }

    #[test]
    fn clouds_drift_with_wind() {
        let mut atmosphere = Atmosphere::new(0);
        atmosphere.set_clouds(true, 1.5, 0.4);
        atmosphere.set_wind(10.0, Vec2::new(0.0, 1.0));
        atmosphere.update(2.0);
        let clouds = atmosphere.state().clouds;
        assert_eq!(clouds.coverage, 1.0);
        assert!((clouds.offset - Vec2::new(0.0, 0.2)).length() < 1e-5);
    }

    #[test]
    fn fog_thins_with_height() {
        let state = AtmosphereState::default();
        let camera = Vec3::new(0.0, 1.0, 0.0);
        let low = state.fog_amount(Vec3::new(100.0, 0.0, 0.0), camera);
        let camera_high = Vec3::new(0.0, 30.0, 0.0);
        let high = state.fog_amount(Vec3::new(100.0, 30.0, 0.0), camera_high);
        assert!(low > high);
        assert!(low > 0.0 && low < 1.0);

        let mut atmosphere = Atmosphere::with_state(state.clone(), 0);
        atmosphere.set_fog(FogState {
            enabled: false,
            ..state.fog
        });
        let color = Vec3::new(0.2, 0.3, 0.4);
        let far = Vec3::new(100.0, 0.0, 0.0);
        assert_eq!(atmosphere.state().apply_fog(color, far, camera), color);
    }

    #[test]
    fn sky_noise_is_bounded_and_follows_the_seed() {
        let a = SkyNoise::new(7);
        let b = SkyNoise::new(7);
        for i in 0..200 {
            let p = Vec2::new(i as f32 * 0.37, i as f32 * -0.11);
            let (cloud, star) = (a.cloud(p), a.star(p * 50.0));
            assert!((0.0..=1.0).contains(&cloud));
            assert!((0.0..=1.0).contains(&star));
            assert_eq!(cloud, b.cloud(p));
        }
        assert_eq!(Atmosphere::new(7).state().sky_noise.seed(), 7);
    }

    #[test]
    fn overcast_sky_differs_from_clear_sky() {
        let view = Vec3::new(0.3, 0.6, 0.2);
        let mut atmosphere = Atmosphere::new(3);
        atmosphere.set_clouds(false, 0.0, 0.0);
        let clear = atmosphere.state().sky_radiance(view);
        atmosphere.set_clouds(true, 1.0, 1.0);
        let overcast = atmosphere.state().sky_radiance(view);
        assert_ne!(clear, overcast);
    }

    #[test]
    fn daytime_sky_is_brighter_toward_zenith_than_ground() {
        let state = AtmosphereState::default();
        let up = state.sky_radiance(Vec3::new(0.0, 1.0, 0.2));
        let down = state.sky_radiance(Vec3::NEG_Y);
        assert!(up.length() > down.length());
    }
}
