/// Unique image record identifier (stable across runs).
/// Example: `coco_train::000000397133`
pub type ImageId = String;
/// Category label attached to an image record.
/// Examples: `CAR`, `POLICE`, `BUS`
pub type Label = String;
/// Filesystem path to an image file.
/// Example: `data/images/000000397133.jpg`
pub type ImagePath = String;
/// Fixed-dimension, L2-normalized embedding produced by the feature model.
pub type FeatureVector = Vec<f32>;
/// Identifier for an extraction worker (accelerator or CPU slot).
/// Examples: `cuda:0`, `cuda:1`, `cpu`
pub type WorkerId = String;
