//! Noise-driven sampler used when no host supplies terrain inputs.
//!
//! Heights come from three Perlin layers (continental, erosion, detail);
//! biomes from a temperature field and regions from a coarse cell field.

use noise::{NoiseFn, Perlin};
use strata_core::blocks;
use strata_core::BlockId;

use crate::{BiomeId, RegionId, Sampler};

/// Configuration for multi-octave noise generation.
#[derive(Debug, Clone)]
pub struct NoiseConfig {
    /// Number of octaves (layers of detail)
    pub octaves: u32,
    /// Frequency multiplier between octaves
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves (persistence)
    pub persistence: f64,
    /// Base frequency (scale)
    pub frequency: f64,
    /// Seed for deterministic generation
    pub seed: u32,
}

impl NoiseConfig {
    /// Large landmasses versus oceans.
    pub fn continental(seed: u32) -> Self {
        Self {
            octaves: 3,
            lacunarity: 2.2,
            persistence: 0.6,
            frequency: 0.005,
            seed,
        }
    }

    /// Medium-scale smoothing.
    pub fn erosion(seed: u32) -> Self {
        Self {
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
            frequency: 0.01,
            seed: seed.wrapping_add(1000),
        }
    }

    /// Fine detail.
    pub fn detail(seed: u32) -> Self {
        Self {
            octaves: 5,
            lacunarity: 2.3,
            persistence: 0.4,
            frequency: 0.02,
            seed: seed.wrapping_add(2000),
        }
    }

    /// Temperature for biome assignment.
    pub fn temperature(seed: u32) -> Self {
        Self {
            octaves: 3,
            lacunarity: 2.0,
            persistence: 0.5,
            frequency: 0.008,
            seed: seed.wrapping_add(3000),
        }
    }

    /// Very coarse field splitting the world into regions.
    pub fn region(seed: u32) -> Self {
        Self {
            octaves: 2,
            lacunarity: 2.0,
            persistence: 0.5,
            frequency: 0.002,
            seed: seed.wrapping_add(4000),
        }
    }
}

/// Fractal Perlin noise.
pub struct NoiseGenerator {
    perlin: Perlin,
    config: NoiseConfig,
}

impl NoiseGenerator {
    /// Create a generator for `config`.
    pub fn new(config: NoiseConfig) -> Self {
        Self {
            perlin: Perlin::new(config.seed),
            config,
        }
    }

    /// Multi-octave sample in `[-1.0, 1.0]`.
    pub fn sample_2d(&self, x: f64, z: f64) -> f64 {
        let mut value = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = self.config.frequency;
        let mut max_value = 0.0;

        for _ in 0..self.config.octaves {
            value += self.perlin.get([x * frequency, z * frequency]) * amplitude;
            max_value += amplitude;

            amplitude *= self.config.persistence;
            frequency *= self.config.lacunarity;
        }

        (value / max_value).clamp(-1.0, 1.0)
    }
}

/// Seeded [`Sampler`] built purely from noise.
pub struct NoiseSampler {
    continental: NoiseGenerator,
    erosion: NoiseGenerator,
    detail: NoiseGenerator,
    temperature: NoiseGenerator,
    region: NoiseGenerator,
    base_height: f64,
    amplitude: f64,
}

impl NoiseSampler {
    /// Number of distinct regions produced.
    pub const REGIONS: u16 = 4;

    /// Sampler centred on level 64 with +-40 blocks of relief.
    pub fn new(seed: u64) -> Self {
        Self::with_relief(seed, 64.0, 40.0)
    }

    /// Sampler with custom base height and relief amplitude.
    pub fn with_relief(seed: u64, base_height: f64, amplitude: f64) -> Self {
        let seed = (seed ^ (seed >> 32)) as u32;
        Self {
            continental: NoiseGenerator::new(NoiseConfig::continental(seed)),
            erosion: NoiseGenerator::new(NoiseConfig::erosion(seed)),
            detail: NoiseGenerator::new(NoiseConfig::detail(seed)),
            temperature: NoiseGenerator::new(NoiseConfig::temperature(seed)),
            region: NoiseGenerator::new(NoiseConfig::region(seed)),
            base_height,
            amplitude,
        }
    }

    fn relief(&self, x: f64, z: f64) -> f64 {
        self.continental.sample_2d(x, z) * 0.5
            + self.erosion.sample_2d(x, z) * 0.3
            + self.detail.sample_2d(x, z) * 0.2
    }
}

impl Sampler for NoiseSampler {
    fn height_at(&self, x: i32, z: i32) -> Option<f64> {
        Some(self.base_height + self.relief(f64::from(x), f64::from(z)) * self.amplitude)
    }

    fn biome_at(&self, x: i32, z: i32) -> BiomeId {
        let t = self.temperature.sample_2d(f64::from(x), f64::from(z));
        if t < -0.25 {
            BiomeId::FROZEN
        } else if t > 0.25 {
            BiomeId::ARID
        } else {
            BiomeId::TEMPERATE
        }
    }

    fn region_at(&self, x: i32, z: i32) -> RegionId {
        let r = (self.region.sample_2d(f64::from(x), f64::from(z)) + 1.0) * 0.5;
        let index = (r * f64::from(Self::REGIONS)) as u16;
        RegionId(index.min(Self::REGIONS - 1))
    }

    fn fluid_block_at(&self, _x: i32, _z: i32) -> BlockId {
        blocks::WATER
    }

    fn rock_block_at(&self, _x: i32, _z: i32) -> BlockId {
        blocks::STONE
    }
}
