use crate::error::{FlowError, SearchError};
use crate::models::ImageTensor;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT: usize = 512;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Side length of the pooled grid an image tensor is reduced to before projection.
const POOL_GRID: usize = 16;

pub enum ClipInput<'a> {
    Text(&'a str),
    Image {
        tensor: Option<&'a ImageTensor>,
        blob: Option<&'a [u8]>,
    },
}

/// Joint text/image encoder; both modalities land in the same vector space.
#[async_trait]
pub trait ClipModel: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Whether `encode` can handle this input, e.g. an image still lacking
    /// the tensor a local model works from.
    fn accepts(&self, input: &ClipInput<'_>) -> bool;

    async fn encode(&self, inputs: &[ClipInput<'_>]) -> Result<Vec<Vec<f32>>, FlowError>;
}

pub trait Embedder {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let bucket = (fnv1a(token.as_bytes()) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        l2_normalize(&mut vector);
        vector
    }
}

/// Deterministic local stand-in for CLIP: trigram hashing for text and a
/// pooled random projection for image tensors. Text-to-image similarity is
/// only meaningful with a real model behind `RemoteClipModel`.
#[derive(Debug, Clone, Copy)]
pub struct HashingClipModel {
    text: CharacterNgramEmbedder,
}

impl HashingClipModel {
    pub fn new(dimensions: usize) -> Self {
        Self {
            text: CharacterNgramEmbedder { dimensions },
        }
    }

    pub fn embed_image(&self, tensor: &ImageTensor) -> Result<Vec<f32>, FlowError> {
        if !tensor.is_consistent() {
            return Err(FlowError::Embedding(format!(
                "image tensor of shape {:?} holds {} values",
                tensor.shape,
                tensor.data.len()
            )));
        }

        let pooled = pool_tensor(tensor);
        let mut vector = vec![0f32; self.text.dimensions.max(1)];

        for (row, slot) in vector.iter_mut().enumerate() {
            let mut sum = 0f32;
            for (column, value) in pooled.iter().enumerate() {
                if projection_sign(row, column) {
                    sum += value;
                } else {
                    sum -= value;
                }
            }
            *slot = sum;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

impl Default for HashingClipModel {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl ClipModel for HashingClipModel {
    fn dimensions(&self) -> usize {
        self.text.dimensions
    }

    fn accepts(&self, input: &ClipInput<'_>) -> bool {
        !matches!(input, ClipInput::Image { tensor: None, .. })
    }

    async fn encode(&self, inputs: &[ClipInput<'_>]) -> Result<Vec<Vec<f32>>, FlowError> {
        inputs
            .iter()
            .map(|input| match input {
                ClipInput::Text(text) => Ok(self.text.embed(text)),
                ClipInput::Image {
                    tensor: Some(tensor),
                    ..
                } => self.embed_image(tensor),
                ClipInput::Image { tensor: None, .. } => Err(FlowError::Embedding(
                    "local model needs a preprocessed image tensor".to_string(),
                )),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
struct RemoteEncodeRequest<'a> {
    data: Vec<RemoteInput<'a>>,
    #[serde(rename = "execEndpoint")]
    exec_endpoint: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum RemoteInput<'a> {
    Text { text: &'a str },
    Blob { blob: String },
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteEncodeResponse {
    data: Vec<RemoteEmbedding>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteEmbedding {
    embedding: Option<Vec<f32>>,
}

/// CLIP served over HTTP (clip-as-service style `/post` endpoint).
pub struct RemoteClipModel {
    endpoint: String,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl RemoteClipModel {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            dimensions,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ClipModel for RemoteClipModel {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn accepts(&self, input: &ClipInput<'_>) -> bool {
        !matches!(input, ClipInput::Image { blob: None, .. })
    }

    async fn encode(&self, inputs: &[ClipInput<'_>]) -> Result<Vec<Vec<f32>>, FlowError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let data = inputs
            .iter()
            .map(|input| match input {
                ClipInput::Text(text) => Ok(RemoteInput::Text { text: *text }),
                ClipInput::Image {
                    blob: Some(blob), ..
                } => Ok(RemoteInput::Blob {
                    blob: STANDARD.encode(blob),
                }),
                ClipInput::Image { blob: None, .. } => Err(FlowError::Embedding(
                    "remote model needs the original image bytes".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut request = self.client.post(&self.endpoint).json(&RemoteEncodeRequest {
            data,
            exec_endpoint: "/encode",
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(SearchError::from)?;
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "clip".to_string(),
                details: response.status().to_string(),
            }
            .into());
        }

        let payload: RemoteEncodeResponse = response.json().await.map_err(SearchError::from)?;
        embeddings_from_response(payload, inputs.len(), self.dimensions)
    }
}

fn embeddings_from_response(
    payload: RemoteEncodeResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, FlowError> {
    if payload.data.len() != expected {
        return Err(FlowError::Embedding(format!(
            "clip returned {} embeddings for {} inputs",
            payload.data.len(),
            expected
        )));
    }

    payload
        .data
        .into_iter()
        .map(|item| match item.embedding {
            Some(embedding) if embedding.len() == dimensions => Ok(embedding),
            Some(embedding) => Err(FlowError::Embedding(format!(
                "clip returned dimension {} instead of {}",
                embedding.len(),
                dimensions
            ))),
            None => Err(FlowError::Embedding("clip response is missing an embedding".to_string())),
        })
        .collect()
}

fn pool_tensor(tensor: &ImageTensor) -> Vec<f32> {
    let (channels, height, width) = (tensor.channels(), tensor.height(), tensor.width());
    let mut pooled = vec![0f32; channels * POOL_GRID * POOL_GRID];
    let mut counts = vec![0u32; pooled.len()];

    for channel in 0..channels {
        for y in 0..height {
            let cell_y = y * POOL_GRID / height.max(1);
            for x in 0..width {
                let cell_x = x * POOL_GRID / width.max(1);
                let slot = (channel * POOL_GRID + cell_y) * POOL_GRID + cell_x;
                pooled[slot] += tensor.at(channel, y, x);
                counts[slot] += 1;
            }
        }
    }

    for (value, count) in pooled.iter_mut().zip(counts) {
        if count > 0 {
            *value /= count as f32;
        }
    }
    pooled
}

/// Entry of a fixed random ±1 matrix, taken from the top bit of a
/// splitmix64-mixed cell index.
fn projection_sign(row: usize, column: usize) -> bool {
    let mut z = (((row as u64) << 32) ^ column as u64).wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    z >> 63 == 0
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector {
            *value /= magnitude;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(fill: impl Fn(usize, usize, usize) -> f32) -> ImageTensor {
        let mut data = Vec::with_capacity(3 * 32 * 32);
        for channel in 0..3 {
            for y in 0..32 {
                for x in 0..32 {
                    data.push(fill(channel, y, x));
                }
            }
        }
        ImageTensor {
            shape: [3, 32, 32],
            data,
        }
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("trilobite diagram");
        let second = embedder.embed("trilobite diagram");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc");
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn hashing_model_encodes_both_modalities() -> Result<(), FlowError> {
        let model = HashingClipModel::new(64);
        let image = tensor(|channel, y, _| (channel + y) as f32 / 10.0);
        let vectors = model
            .encode(&[
                ClipInput::Text("fossil"),
                ClipInput::Image {
                    tensor: Some(&image),
                    blob: None,
                },
            ])
            .await?;

        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 64));
        let norm = vectors[1].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        Ok(())
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn similar_images_are_closer_than_different_ones() -> Result<(), FlowError> {
        let model = HashingClipModel::new(128);
        let base = model.embed_image(&tensor(|_, y, _| y as f32 / 32.0))?;
        let near = model.embed_image(&tensor(|_, y, _| y as f32 / 32.0 + 0.01))?;
        let far = model.embed_image(&tensor(|_, _, x| 1.0 - x as f32 / 16.0))?;

        assert!(dot(&base, &near) > dot(&base, &far));
        Ok(())
    }

    #[test]
    fn unrelated_images_do_not_collapse_onto_one_direction() -> Result<(), FlowError> {
        let model = HashingClipModel::new(128);
        let rows = model.embed_image(&tensor(|_, y, _| y as f32 / 32.0))?;
        let columns = model.embed_image(&tensor(|_, _, x| 1.0 - x as f32 / 16.0))?;
        let checker = model.embed_image(&tensor(|channel, y, x| {
            if (channel + y / 4 + x / 4) % 2 == 0 {
                1.0
            } else {
                -1.0
            }
        }))?;

        assert!(dot(&rows, &columns).abs() < 0.99);
        assert!(dot(&rows, &checker).abs() < 0.99);
        assert!(dot(&columns, &checker).abs() < 0.99);

        let flat = model.embed_image(&tensor(|_, _, _| 0.5))?;
        let norm = flat.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn tensor_shape_must_match_its_data() {
        let model = HashingClipModel::default();
        let hollow = ImageTensor {
            shape: [3, 224, 224],
            data: Vec::new(),
        };
        assert!(matches!(
            model.embed_image(&hollow),
            Err(FlowError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn local_model_rejects_unprocessed_images() {
        let model = HashingClipModel::default();
        let result = model
            .encode(&[ClipInput::Image {
                tensor: None,
                blob: Some(&[1, 2, 3]),
            }])
            .await;
        assert!(matches!(result, Err(FlowError::Embedding(_))));
    }

    #[test]
    fn remote_response_dimension_is_checked() {
        let payload = RemoteEncodeResponse {
            data: vec![RemoteEmbedding {
                embedding: Some(vec![0.0; 3]),
            }],
        };
        assert!(embeddings_from_response(payload, 1, 4).is_err());
    }
}
