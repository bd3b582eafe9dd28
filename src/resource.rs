use crate::FluidError;
use crate::device::{
    FilterMode, RenderDevice, RenderTarget, TextureBinding, TextureDescriptor, TextureFormat,
    TextureId,
};
use glam::Vec2;

/// Size, format and filtering of a resource to be created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLayout {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: FilterMode,
}

/// An off-screen grid buffer that can be sampled and rendered into.
#[derive(Debug, PartialEq)]
pub struct Resource {
    texture: TextureId,
    width: u32,
    height: u32,
    format: TextureFormat,
    filter: FilterMode,
    texel_size: Vec2,
}

impl Resource {
    pub fn create<D: RenderDevice + ?Sized>(
        device: &mut D,
        label: &'static str,
        width: u32,
        height: u32,
        format: TextureFormat,
        filter: FilterMode,
    ) -> Result<Self, FluidError> {
        let texture = device.create_texture(&TextureDescriptor {
            label,
            width,
            height,
            format,
            filter,
        })?;
        Ok(Self {
            texture,
            width,
            height,
            format,
            filter,
            texel_size: Vec2::new(1.0 / width as f32, 1.0 / height as f32),
        })
    }

    /// Creates one resource per layout, in order. If any creation fails the
    /// resources already created are released before the error is returned.
    pub fn create_all<D: RenderDevice + ?Sized, const N: usize>(
        device: &mut D,
        layouts: [ResourceLayout; N],
    ) -> Result<[Resource; N], FluidError> {
        let mut created = Vec::with_capacity(N);
        for layout in layouts {
            let resource = Resource::create(
                device,
                layout.label,
                layout.width,
                layout.height,
                layout.format,
                layout.filter,
            );
            match resource {
                Ok(resource) => created.push(resource),
                Err(err) => {
                    for resource in created {
                        resource.release(device);
                    }
                    return Err(err);
                }
            }
        }
        created
            .try_into()
            .map_err(|_: Vec<Resource>| FluidError::Gpu(format!("expected {N} resources")))
    }

    /// Binds this texture to texture unit `unit` for sampling.
    pub fn attach(&self, unit: u32) -> TextureBinding {
        TextureBinding {
            unit,
            texture: self.texture,
        }
    }

    pub fn target(&self) -> RenderTarget {
        RenderTarget::Texture(self.texture)
    }

    pub fn release<D: RenderDevice + ?Sized>(self, device: &mut D) {
        device.release_texture(self.texture);
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn texel_size(&self) -> Vec2 {
        self.texel_size
    }
}

/// Two identical resources whose read/write roles swap after every in-place pass.
///
/// After `swap`, `read` holds the most recently written data and `write` is
/// free to be overwritten.
#[derive(Debug)]
pub struct DoubleBuffer {
    read: Resource,
    write: Resource,
}

impl DoubleBuffer {
    pub fn create<D: RenderDevice + ?Sized>(
        device: &mut D,
        label: &'static str,
        width: u32,
        height: u32,
        format: TextureFormat,
        filter: FilterMode,
    ) -> Result<Self, FluidError> {
        let layout = ResourceLayout {
            label,
            width,
            height,
            format,
            filter,
        };
        let [read, write] = Resource::create_all(device, [layout; 2])?;
        Ok(Self { read, write })
    }

    /// Pairs two resources of the same layout.
    pub fn from_pair(read: Resource, write: Resource) -> Self {
        Self { read, write }
    }

    pub fn read(&self) -> &Resource {
        &self.read
    }

    pub fn write(&self) -> &Resource {
        &self.write
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.read, &mut self.write);
    }

    pub fn width(&self) -> u32 {
        self.read.width
    }

    pub fn height(&self) -> u32 {
        self.read.height
    }

    pub fn texel_size(&self) -> Vec2 {
        self.read.texel_size
    }

    pub fn release<D: RenderDevice + ?Sized>(self, device: &mut D) {
        self.read.release(device);
        self.write.release(device);
    }
}
