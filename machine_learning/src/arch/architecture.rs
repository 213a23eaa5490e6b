use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// The geometry of the images the network consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

/// A backbone block: `convs` 3x3 convolutions of `filters` channels, then a 2x2 max pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpec {
    pub filters: usize,
    pub convs: usize,
}

impl BlockSpec {
    pub fn new(filters: usize, convs: usize) -> Self {
        Self { filters, convs }
    }

    /// The convolutional layout of VGG16.
    pub fn vgg16() -> Vec<Self> {
        vec![
            Self::new(64, 2),
            Self::new(128, 2),
            Self::new(256, 3),
            Self::new(512, 3),
            Self::new(512, 3),
        ]
    }
}

/// A named tensor inside the flat parameter buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorLayout {
    pub name: String,
    pub shape: Vec<usize>,
    pub range: Range<usize>,
}

/// The full description of a classifier: frozen backbone, flatten, a hidden dense layer and a
/// single sigmoid output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub input: InputShape,
    pub blocks: Vec<BlockSpec>,
    pub hidden_units: usize,
}

impl Architecture {
    /// Checks that the architecture describes a buildable network.
    ///
    /// # Returns
    /// An error naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        let InputShape {
            height,
            width,
            channels,
        } = self.input;

        if height == 0 || width == 0 || channels == 0 {
            return Err(MlErr::Architecture(format!(
                "input shape {height}x{width}x{channels} has an empty dimension"
            )));
        }

        if let Some(i) = self.blocks.iter().position(|b| b.filters == 0 || b.convs == 0) {
            return Err(MlErr::Architecture(format!("block {} is empty", i + 1)));
        }

        let (h, w) = self.feature_map();
        if h == 0 || w == 0 {
            return Err(MlErr::Architecture(format!(
                "{height}x{width} images vanish after {} pooling stages",
                self.blocks.len()
            )));
        }

        if self.hidden_units == 0 {
            return Err(MlErr::Architecture("the hidden layer has no units".into()));
        }

        Ok(())
    }

    /// The spatial size of the last feature map.
    fn feature_map(&self) -> (usize, usize) {
        self.blocks
            .iter()
            .fold((self.input.height, self.input.width), |(h, w), _| (h / 2, w / 2))
    }

    /// The length of the flattened backbone output.
    pub fn feature_len(&self) -> usize {
        let (h, w) = self.feature_map();
        let channels = self
            .blocks
            .last()
            .map_or(self.input.channels, |block| block.filters);

        h * w * channels
    }

    /// Every tensor of the network in the order it appears in the flat parameter buffer:
    /// the backbone's convolutions first, then the two dense layers of the head.
    pub fn layout(&self) -> Vec<TensorLayout> {
        let mut layout = Vec::new();
        let mut offset = 0;
        let mut push = |name: String, shape: Vec<usize>| {
            let len = shape.iter().product::<usize>();
            layout.push(TensorLayout {
                name,
                shape,
                range: offset..offset + len,
            });
            offset += len;
        };

        let mut in_channels = self.input.channels;
        for (b, block) in self.blocks.iter().enumerate() {
            for c in 0..block.convs {
                let prefix = format!("block{}_conv{}", b + 1, c + 1);
                push(
                    format!("{prefix}.kernel"),
                    vec![3, 3, in_channels, block.filters],
                );
                push(format!("{prefix}.bias"), vec![block.filters]);
                in_channels = block.filters;
            }
        }

        let dims = [
            (self.feature_len(), self.hidden_units),
            (self.hidden_units, 1),
        ];

        for (i, (n_in, n_out)) in dims.into_iter().enumerate() {
            push(format!("dense_{}.kernel", i + 1), vec![n_in, n_out]);
            push(format!("dense_{}.bias", i + 1), vec![n_out]);
        }

        layout
    }

    /// The amount of parameters of the frozen backbone.
    pub fn backbone_size(&self) -> usize {
        self.layout()
            .iter()
            .filter(|t| t.name.starts_with("block"))
            .map(|t| t.range.len())
            .sum()
    }

    /// The amount of trainable parameters.
    pub fn head_size(&self) -> usize {
        (self.feature_len() + 1) * self.hidden_units + self.hidden_units + 1
    }

    pub fn size(&self) -> usize {
        self.backbone_size() + self.head_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Architecture {
        Architecture {
            input: InputShape {
                height: 8,
                width: 8,
                channels: 3,
            },
            blocks: vec![BlockSpec::new(4, 1), BlockSpec::new(8, 2)],
            hidden_units: 5,
        }
    }

    #[test]
    fn layout_is_contiguous_and_ordered() {
        let arch = tiny();
        let layout = arch.layout();

        let names: Vec<_> = layout.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "block1_conv1.kernel",
                "block1_conv1.bias",
                "block2_conv1.kernel",
                "block2_conv1.bias",
                "block2_conv2.kernel",
                "block2_conv2.bias",
                "dense_1.kernel",
                "dense_1.bias",
                "dense_2.kernel",
                "dense_2.bias",
            ]
        );

        for pair in layout.windows(2) {
            assert_eq!(pair[0].range.end, pair[1].range.start);
        }

        assert_eq!(layout.last().unwrap().range.end, arch.size());
        assert_eq!(layout[2].shape, [3, 3, 4, 8]);
    }

    #[test]
    fn feature_len_follows_the_pooling() {
        let arch = tiny();
        assert_eq!(arch.feature_len(), 2 * 2 * 8);
        assert_eq!(arch.head_size(), (32 + 1) * 5 + 6);
    }

    #[test]
    fn vanishing_feature_maps_are_rejected() {
        let mut arch = tiny();
        arch.input.height = 2;
        assert!(matches!(arch.validate(), Err(MlErr::Architecture(_))));
    }

    #[test]
    fn vgg16_on_128px_images() {
        let arch = Architecture {
            input: InputShape {
                height: 128,
                width: 128,
                channels: 3,
            },
            blocks: BlockSpec::vgg16(),
            hidden_units: 128,
        };

        arch.validate().unwrap();
        assert_eq!(arch.feature_len(), 4 * 4 * 512);
        assert_eq!(arch.backbone_size(), 14_714_688);
    }
}
