use serde::{Deserialize, Serialize};

use super::{Relu, Sigmoid};

/// The activation functions a layer can be built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFn {
    Relu,
    Sigmoid,
}

impl ActFn {
    pub fn f(&self, z: f32) -> f32 {
        match self {
            ActFn::Relu => Relu.f(z),
            ActFn::Sigmoid => Sigmoid.f(z),
        }
    }

    pub fn df(&self, z: f32) -> f32 {
        match self {
            ActFn::Relu => Relu.df(z),
            ActFn::Sigmoid => Sigmoid.df(z),
        }
    }
}
