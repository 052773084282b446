use crate::{config, error::LayoutError};

use super::{BindGroupLayoutEntry, BindingType, ShaderStages};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerStageCounts {
    pub sampled_textures: u32,
    pub samplers: u32,
    pub storage_buffers: u32,
    pub storage_textures: u32,
    pub uniform_buffers: u32,
}

impl PerStageCounts {
    fn accumulate(&mut self, other: &PerStageCounts) {
        self.sampled_textures += other.sampled_textures;
        self.samplers += other.samplers;
        self.storage_buffers += other.storage_buffers;
        self.storage_textures += other.storage_textures;
        self.uniform_buffers += other.uniform_buffers;
    }
}

/// Binding counts of one bind group layout, or summed over a pipeline layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindingCounts {
    pub total: u32,
    pub dynamic_uniform_buffers: u32,
    pub dynamic_storage_buffers: u32,
    /// Indexed vertex, fragment, compute.
    pub per_stage: [PerStageCounts; 3],
}

const STAGES: [ShaderStages; 3] = [
    ShaderStages::VERTEX,
    ShaderStages::FRAGMENT,
    ShaderStages::COMPUTE,
];

impl BindingCounts {
    pub fn add(&mut self, entry: &BindGroupLayoutEntry) {
        self.total += 1;
        if entry.has_dynamic_offset {
            match entry.ty {
                BindingType::UniformBuffer => self.dynamic_uniform_buffers += 1,
                BindingType::StorageBuffer | BindingType::ReadonlyStorageBuffer => {
                    self.dynamic_storage_buffers += 1
                }
                _ => {}
            }
        }

        for (i, stage) in STAGES.iter().enumerate() {
            if !entry.visibility.contains(*stage) {
                continue;
            }
            let counts = &mut self.per_stage[i];
            match entry.ty {
                BindingType::UniformBuffer => counts.uniform_buffers += 1,
                BindingType::StorageBuffer | BindingType::ReadonlyStorageBuffer => {
                    counts.storage_buffers += 1
                }
                BindingType::Sampler | BindingType::ComparisonSampler => counts.samplers += 1,
                BindingType::SampledTexture | BindingType::MultisampledTexture => {
                    counts.sampled_textures += 1
                }
                BindingType::ReadonlyStorageTexture | BindingType::WriteonlyStorageTexture => {
                    counts.storage_textures += 1
                }
            }
        }
    }

    pub fn accumulate(&mut self, other: &BindingCounts) {
        self.total += other.total;
        self.dynamic_uniform_buffers += other.dynamic_uniform_buffers;
        self.dynamic_storage_buffers += other.dynamic_storage_buffers;
        for (mine, theirs) in self.per_stage.iter_mut().zip(other.per_stage.iter()) {
            mine.accumulate(theirs);
        }
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        let check = |what: &'static str, count: u32, max: u32| {
            if count > max {
                Err(LayoutError::BindingCountExceeded { what, count, max })
            } else {
                Ok(())
            }
        };

        check(
            "dynamic uniform buffers",
            self.dynamic_uniform_buffers,
            config::MAX_DYNAMIC_UNIFORM_BUFFERS_PER_PIPELINE_LAYOUT,
        )?;
        check(
            "dynamic storage buffers",
            self.dynamic_storage_buffers,
            config::MAX_DYNAMIC_STORAGE_BUFFERS_PER_PIPELINE_LAYOUT,
        )?;

        for counts in &self.per_stage {
            check(
                "sampled textures per shader stage",
                counts.sampled_textures,
                config::MAX_SAMPLED_TEXTURES_PER_SHADER_STAGE,
            )?;
            check(
                "samplers per shader stage",
                counts.samplers,
                config::MAX_SAMPLERS_PER_SHADER_STAGE,
            )?;
            check(
                "storage buffers per shader stage",
                counts.storage_buffers,
                config::MAX_STORAGE_BUFFERS_PER_SHADER_STAGE,
            )?;
            check(
                "storage textures per shader stage",
                counts.storage_textures,
                config::MAX_STORAGE_TEXTURES_PER_SHADER_STAGE,
            )?;
            check(
                "uniform buffers per shader stage",
                counts.uniform_buffers,
                config::MAX_UNIFORM_BUFFERS_PER_SHADER_STAGE,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_apply_after_accumulation() {
        let mut one_group = BindingCounts::default();
        for binding in 0..4 {
            one_group.add(
                &BindGroupLayoutEntry::new(binding, ShaderStages::COMPUTE, BindingType::StorageBuffer),
            );
        }
        assert!(one_group.validate().is_ok());

        let mut layout = BindingCounts::default();
        layout.accumulate(&one_group);
        layout.accumulate(&one_group);
        assert_eq!(layout.per_stage[2].storage_buffers, 8);
        assert!(matches!(
            layout.validate(),
            Err(LayoutError::BindingCountExceeded { count: 8, max: 6, .. })
        ));
    }
}
