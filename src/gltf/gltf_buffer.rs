use std::mem::size_of;

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use gltf_json as json;
use gltf_json::accessor::{ComponentType, GenericComponentType, Type};
use gltf_json::validation::Checked::Valid;
use gltf_json::validation::USize64;
use hashbrown::HashMap;
use image::DynamicImage;
use parking_lot::Mutex;
use tracing::debug;

use crate::binary::align4;
use crate::error::{Error, Result};
use crate::gltf::{index, to_usize, BackingBuffer, GltfDocument};
use crate::texture::{ColorEncoding, RasterEncoder};

/// Component type and shape of an accessor element, or the reason the
/// element cannot be stored in an accessor at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Supported {
        component: ComponentType,
        shape: Type,
    },
    Unsupported(&'static str),
}

impl ElementKind {
    pub fn layout(self) -> Result<(ComponentType, Type)> {
        match self {
            ElementKind::Supported { component, shape } => Ok((component, shape)),
            ElementKind::Unsupported(kind) => Err(Error::UnsupportedElementType { kind }),
        }
    }

    pub fn element_size(self) -> Result<usize> {
        let (component, shape) = self.layout()?;
        Ok(component.size() * shape.multiplicity())
    }
}

/// Byte size of one element of `accessor`.
fn accessor_element_size(index: usize, accessor: &json::Accessor) -> Result<usize> {
    match (&accessor.component_type, &accessor.type_) {
        (Valid(GenericComponentType(component)), Valid(shape)) => {
            Ok(component.size() * shape.multiplicity())
        }
        _ => Err(Error::InvalidContainerFormat {
            message: format!("accessor {index} has an unknown component type or shape"),
        }),
    }
}

/// A value that can be written to and read back from an accessor.
///
/// `encode` appends exactly the element size in little-endian order and
/// `decode` receives exactly that many bytes.
pub trait AccessorElement: Copy {
    const KIND: ElementKind;

    fn encode(&self, out: &mut Vec<u8>);

    fn decode(bytes: &[u8]) -> Self;

    /// Component `index` widened for min/max bookkeeping.
    fn component(&self, index: usize) -> f64;
}

macro_rules! scalar_element {
    ($($ty:ty => $component:ident),* $(,)?) => {$(
        impl AccessorElement for $ty {
            const KIND: ElementKind = ElementKind::Supported {
                component: ComponentType::$component,
                shape: Type::Scalar,
            };

            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn decode(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }

            fn component(&self, _index: usize) -> f64 {
                *self as f64
            }
        }

        impl AccessorElement for [$ty; 4] {
            const KIND: ElementKind = ElementKind::Supported {
                component: ComponentType::$component,
                shape: Type::Vec4,
            };

            fn encode(&self, out: &mut Vec<u8>) {
                for value in self {
                    value.encode(out);
                }
            }

            fn decode(bytes: &[u8]) -> Self {
                let size = size_of::<$ty>();
                std::array::from_fn(|i| <$ty>::decode(&bytes[i * size..(i + 1) * size]))
            }

            fn component(&self, index: usize) -> f64 {
                self[index] as f64
            }
        }
    )*};
}

scalar_element!(
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    f32 => F32,
);

// glTF has no component type for these.
macro_rules! unsupported_element {
    ($($ty:ty),* $(,)?) => {$(
        impl AccessorElement for $ty {
            const KIND: ElementKind = ElementKind::Unsupported(stringify!($ty));

            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn decode(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }

            fn component(&self, _index: usize) -> f64 {
                *self as f64
            }
        }
    )*};
}

unsupported_element!(i32, f64);

fn encode_floats(values: &[f32], out: &mut Vec<u8>) {
    for value in values {
        value.encode(out);
    }
}

fn decode_floats<const N: usize>(bytes: &[u8]) -> [f32; N] {
    std::array::from_fn(|i| f32::decode(&bytes[i * 4..i * 4 + 4]))
}

macro_rules! float_vector_element {
    ($($ty:ty => $shape:ident, $n:literal, $to:ident, $from:expr);* $(;)?) => {$(
        impl AccessorElement for $ty {
            const KIND: ElementKind = ElementKind::Supported {
                component: ComponentType::F32,
                shape: Type::$shape,
            };

            fn encode(&self, out: &mut Vec<u8>) {
                encode_floats(&self.$to(), out);
            }

            fn decode(bytes: &[u8]) -> Self {
                let from = $from;
                from(&decode_floats::<$n>(bytes))
            }

            fn component(&self, index: usize) -> f64 {
                self.$to()[index] as f64
            }
        }
    )*};
}

float_vector_element!(
    Vec2 => Vec2, 2, to_array, |f: &[f32; 2]| Vec2::from_array(*f);
    Vec3 => Vec3, 3, to_array, |f: &[f32; 3]| Vec3::from_array(*f);
    Vec4 => Vec4, 4, to_array, |f: &[f32; 4]| Vec4::from_array(*f);
    Quat => Vec4, 4, to_array, |f: &[f32; 4]| Quat::from_array(*f);
    Mat4 => Mat4, 16, to_cols_array, |f: &[f32; 16]| Mat4::from_cols_array(f);
);

/// Where a new buffer view's bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferSelector {
    /// The single unnamed buffer, created on first use.
    Default,
    /// A fresh buffer written to its own file under this URI.
    Named(String),
}

#[derive(Debug, Clone, Default)]
pub struct AccessorOptions {
    /// Debug name; the view is named `<name>/bufferView` and the accessor
    /// `<name>/accessor[start..end]`.
    pub name: Option<String>,
    pub start: usize,
    /// Defaults to every element from `start` on.
    pub count: Option<usize>,
    /// Reuse an existing view instead of writing `data` to a new one.
    pub buffer_view: Option<usize>,
    pub target: Option<json::buffer::Target>,
}

#[derive(Default)]
struct AllocatorState {
    buffers: Vec<BackingBuffer>,
    buffer_views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
    images: Vec<json::Image>,
    textures: Vec<json::Texture>,
    texture_lookup: HashMap<String, usize>,
    default_buffer: Option<usize>,
}

impl AllocatorState {
    fn allocate_view(
        &mut self,
        selector: BufferSelector,
        bytes: &[u8],
        target: Option<json::buffer::Target>,
        name: Option<String>,
    ) -> usize {
        let buffer_index = match selector {
            BufferSelector::Default => match self.default_buffer {
                Some(index) => index,
                None => {
                    self.buffers.push(BackingBuffer::default());
                    let index = self.buffers.len() - 1;
                    self.default_buffer = Some(index);
                    index
                }
            },
            BufferSelector::Named(uri) => {
                self.buffers.push(BackingBuffer {
                    uri: Some(uri.replace(':', "_")),
                    data: Vec::new(),
                });
                self.buffers.len() - 1
            }
        };

        let buffer = &mut self.buffers[buffer_index];
        let offset = align4(buffer.data.len());
        buffer.data.resize(offset, 0);
        buffer.data.extend_from_slice(bytes);

        self.buffer_views.push(json::buffer::View {
            buffer: index(buffer_index),
            byte_length: USize64::from(bytes.len()),
            byte_offset: Some(USize64::from(offset)),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name,
            target: target.map(Valid),
        });
        self.buffer_views.len() - 1
    }
}

/// Append-only store of buffers, buffer views, accessors and textures.
///
/// All state sits behind one mutex; each operation holds it only for the
/// append it performs.
#[derive(Default)]
pub struct BufferAllocator {
    state: Mutex<AllocatorState>,
}

impl BufferAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the binary-backed arrays out of `document`, leaving the rest of
    /// the JSON graph in the returned root.
    pub fn from_document(document: GltfDocument) -> (json::Root, Self) {
        let GltfDocument { mut root, buffers } = document;
        let buffer_views = std::mem::take(&mut root.buffer_views);
        let accessors = std::mem::take(&mut root.accessors);
        let images = std::mem::take(&mut root.images);
        let textures = std::mem::take(&mut root.textures);
        root.buffers.clear();

        let default_buffer = buffers.iter().position(|buffer| buffer.uri.is_none());
        let texture_lookup = textures
            .iter()
            .enumerate()
            .filter_map(|(index, texture)| texture.name.clone().map(|name| (name, index)))
            .collect();

        let allocator = Self {
            state: Mutex::new(AllocatorState {
                buffers,
                buffer_views,
                accessors,
                images,
                textures,
                texture_lookup,
                default_buffer,
            }),
        };
        (root, allocator)
    }

    /// Moves everything back into `root` and fills in buffer lengths.
    pub fn into_document(self, mut root: json::Root) -> GltfDocument {
        let state = self.state.into_inner();
        root.buffers = state.buffers.iter().map(BackingBuffer::describe).collect();
        root.buffer_views = state.buffer_views;
        root.accessors = state.accessors;
        root.images = state.images;
        root.textures = state.textures;
        GltfDocument {
            root,
            buffers: state.buffers,
        }
    }

    /// Appends `bytes` at the next 4-byte boundary of the selected buffer.
    pub fn allocate_buffer_view(
        &self,
        selector: BufferSelector,
        bytes: &[u8],
        target: Option<json::buffer::Target>,
    ) -> usize {
        self.state.lock().allocate_view(selector, bytes, target, None)
    }

    pub fn add_accessor<T: AccessorElement>(
        &self,
        data: &[T],
        target: Option<json::buffer::Target>,
    ) -> Result<usize> {
        self.add_accessor_with(
            data,
            AccessorOptions {
                target,
                ..AccessorOptions::default()
            },
        )
    }

    pub fn add_accessor_with<T: AccessorElement>(
        &self,
        data: &[T],
        options: AccessorOptions,
    ) -> Result<usize> {
        let (component_type, shape) = T::KIND.layout()?;
        let element_size = component_type.size() * shape.multiplicity();

        let start = options.start;
        if start > data.len() {
            return Err(Error::IndexOutOfRange {
                what: "accessor start",
                index: start as i64,
                len: data.len(),
            });
        }
        let count = options.count.unwrap_or(data.len() - start);
        let end = start + count;
        if end > data.len() {
            return Err(Error::IndexOutOfRange {
                what: "accessor end",
                index: end as i64,
                len: data.len(),
            });
        }

        let (min, max) = min_max(&data[start..end], shape.multiplicity());

        let mut encoded = Vec::new();
        if options.buffer_view.is_none() {
            encoded.reserve(data.len() * element_size);
            for element in data {
                element.encode(&mut encoded);
            }
        }

        let mut state = self.state.lock();
        let buffer_view = match options.buffer_view {
            Some(view) => {
                if view >= state.buffer_views.len() {
                    return Err(Error::IndexOutOfRange {
                        what: "buffer view",
                        index: view as i64,
                        len: state.buffer_views.len(),
                    });
                }
                view
            }
            None => state.allocate_view(
                BufferSelector::Default,
                &encoded,
                options.target,
                options.name.as_ref().map(|name| format!("{name}/bufferView")),
            ),
        };

        state.accessors.push(json::Accessor {
            buffer_view: Some(index(buffer_view)),
            byte_offset: Some(USize64::from(start * element_size)),
            count: USize64::from(count),
            component_type: Valid(GenericComponentType(component_type)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(shape),
            min,
            max,
            name: options
                .name
                .map(|name| format!("{name}/accessor[{start}..{end}]")),
            normalized: false,
            sparse: None,
        });
        Ok(state.accessors.len() - 1)
    }

    /// Decodes accessor `index` back into typed elements.
    pub fn read_accessor<T: AccessorElement>(&self, index: usize) -> Result<Vec<T>> {
        let element_size = T::KIND.element_size()?;
        let state = self.state.lock();
        let accessor = state.accessors.get(index).ok_or(Error::IndexOutOfRange {
            what: "accessor",
            index: index as i64,
            len: state.accessors.len(),
        })?;
        let stored_size = accessor_element_size(index, accessor)?;
        if stored_size != element_size {
            return Err(Error::AccessorShapeMismatch {
                accessor: index,
                expected: stored_size,
                actual: element_size,
            });
        }
        let count = to_usize(accessor.count);

        let Some(view_index) = accessor.buffer_view.map(|view| view.value()) else {
            // glTF: an accessor without a view reads as zeros.
            let zero = T::decode(&vec![0u8; element_size]);
            return Ok(vec![zero; count]);
        };
        let view = state
            .buffer_views
            .get(view_index)
            .ok_or(Error::IndexOutOfRange {
                what: "buffer view",
                index: view_index as i64,
                len: state.buffer_views.len(),
            })?;
        let buffer_index = view.buffer.value();
        let buffer = state
            .buffers
            .get(buffer_index)
            .ok_or(Error::IndexOutOfRange {
                what: "buffer",
                index: buffer_index as i64,
                len: state.buffers.len(),
            })?;

        let out_of_bounds = |offset: usize, end: usize| Error::BufferViewOutOfBounds {
            view: view_index,
            buffer: buffer_index,
            offset,
            end,
            length: buffer.data.len(),
        };
        let view_offset = view.byte_offset.map_or(0, to_usize);
        let view_end = view_offset.saturating_add(to_usize(view.byte_length));
        let begin = view_offset
            .checked_add(accessor.byte_offset.map_or(0, to_usize))
            .ok_or_else(|| out_of_bounds(view_offset, usize::MAX))?;
        let end = count
            .checked_mul(element_size)
            .and_then(|length| begin.checked_add(length))
            .ok_or_else(|| out_of_bounds(begin, usize::MAX))?;
        if end > view_end || end > buffer.data.len() {
            return Err(out_of_bounds(begin, end));
        }

        Ok(buffer.data[begin..end]
            .chunks_exact(element_size)
            .map(T::decode)
            .collect())
    }

    /// Index of the texture registered under `name`, if any.
    pub fn find_texture(&self, name: &str) -> Option<usize> {
        self.state.lock().texture_lookup.get(name).copied()
    }

    /// Encodes `image` into its own `<name>.png` buffer and registers an
    /// image and texture for it. Repeated names return the first texture
    /// without encoding again.
    pub fn add_texture(
        &self,
        name: &str,
        image: &DynamicImage,
        encoding: ColorEncoding,
        encoder: &dyn RasterEncoder,
    ) -> Result<usize> {
        if let Some(index) = self.find_texture(name) {
            return Ok(index);
        }

        let encoded = encoder.encode(image, encoding)?;

        let mut state = self.state.lock();
        // Another caller may have registered the name while we were encoding.
        if let Some(&index) = state.texture_lookup.get(name) {
            return Ok(index);
        }
        let buffer_view = state.allocate_view(
            BufferSelector::Named(format!("{name}.png")),
            &encoded,
            None,
            None,
        );
        state.images.push(json::Image {
            buffer_view: Some(index(buffer_view)),
            mime_type: Some(json::image::MimeType(encoder.mime_type().to_string())),
            name: Some(name.to_string()),
            uri: None,
            extensions: None,
            extras: Default::default(),
        });
        let source = state.images.len() - 1;
        state.textures.push(json::Texture {
            name: Some(name.to_string()),
            sampler: None,
            source: index(source),
            extensions: None,
            extras: Default::default(),
        });
        let texture = state.textures.len() - 1;
        state.texture_lookup.insert(name.to_string(), texture);
        debug!("texture {} -> #{} ({} bytes)", name, texture, encoded.len());
        Ok(texture)
    }

    pub fn buffer_view(&self, index: usize) -> Option<json::buffer::View> {
        self.state.lock().buffer_views.get(index).cloned()
    }

    pub fn accessor(&self, index: usize) -> Option<json::Accessor> {
        self.state.lock().accessors.get(index).cloned()
    }

    pub fn buffer_view_count(&self) -> usize {
        self.state.lock().buffer_views.len()
    }

    pub fn accessor_count(&self) -> usize {
        self.state.lock().accessors.len()
    }
}

fn bounds(values: Vec<f64>) -> json::Value {
    json::Value::Array(values.into_iter().map(json::Value::from).collect())
}

fn min_max<T: AccessorElement>(
    elements: &[T],
    components: usize,
) -> (Option<json::Value>, Option<json::Value>) {
    if elements.is_empty() {
        return (None, None);
    }
    let mut min = vec![f64::INFINITY; components];
    let mut max = vec![f64::NEG_INFINITY; components];
    for element in elements {
        for c in 0..components {
            let value = element.component(c);
            min[c] = min[c].min(value);
            max[c] = max[c].max(value);
        }
    }
    (Some(bounds(min)), Some(bounds(max)))
}
