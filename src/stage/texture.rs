use crate::{
    foundation::core::{Bitmap, OutputSize},
    gpu::device::{GpuDevice, TextureId},
};

/// A device texture plus whether the holder is responsible for deleting it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRef {
    pub id: TextureId,
    pub owned: bool,
}

impl TextureRef {
    pub fn owned(id: TextureId) -> Self {
        Self { id, owned: true }
    }

    /// A texture owned elsewhere (e.g. the camera frame); never deleted by the holder.
    pub fn borrowed(id: TextureId) -> Self {
        Self { id, owned: false }
    }
}

/// Holder for at most one texture. Content changes replace the texture, releasing
/// the previous one if it was owned.
#[derive(Debug, Default)]
pub struct TextureSlot {
    current: Option<TextureRef>,
    size: Option<OutputSize>,
}

impl TextureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<TextureRef> {
        self.current
    }

    pub fn id(&self) -> Option<TextureId> {
        self.current.map(|t| t.id)
    }

    /// Pixel size of the installed texture.
    pub fn size(&self) -> Option<OutputSize> {
        self.size
    }

    /// Upload `bitmap` and install it. Invalid bitmaps and failed uploads keep the
    /// current texture; returns whether a new texture was installed.
    pub fn upload(&mut self, device: &mut dyn GpuDevice, bitmap: &Bitmap) -> bool {
        if !bitmap.is_valid() {
            tracing::warn!(
                width = bitmap.width,
                height = bitmap.height,
                "skipping upload of invalid bitmap"
            );
            return false;
        }
        match device.upload_texture(bitmap) {
            Ok(id) => {
                self.install(device, TextureRef::owned(id), bitmap.size());
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "texture upload failed");
                false
            }
        }
    }

    pub fn install(&mut self, device: &mut dyn GpuDevice, texture: TextureRef, size: OutputSize) {
        if let Some(old) = self.current.replace(texture)
            && old.owned
            && old.id != texture.id
        {
            device.delete_texture(old.id);
        }
        self.size = Some(size);
    }

    pub fn release(&mut self, device: &mut dyn GpuDevice) {
        if let Some(old) = self.current.take()
            && old.owned
        {
            device.delete_texture(old.id);
        }
        self.size = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::cpu::{CpuDevice, DeviceCall};

    fn bitmap() -> Bitmap {
        Bitmap::solid(2, 1, [255, 0, 0, 255]).unwrap()
    }

    #[test]
    fn replacing_releases_previous_owned_texture() {
        let mut dev = CpuDevice::new(OutputSize::new(1, 1));
        let mut slot = TextureSlot::new();
        assert!(slot.upload(&mut dev, &bitmap()));
        let first = slot.id().unwrap();
        assert!(slot.upload(&mut dev, &bitmap()));
        assert_ne!(slot.id(), Some(first));
        assert!(dev.texture(first).is_none());
        assert_eq!(dev.texture_count(), 1);
        assert_eq!(slot.size(), Some(OutputSize::new(2, 1)));
    }

    #[test]
    fn invalid_bitmap_keeps_previous_texture() {
        let mut dev = CpuDevice::new(OutputSize::new(1, 1));
        let mut slot = TextureSlot::new();
        slot.upload(&mut dev, &bitmap());
        let before = slot.get();
        let broken = Bitmap {
            width: 0,
            height: 0,
            rgba8_premul: Default::default(),
        };
        assert!(!slot.upload(&mut dev, &broken));
        assert_eq!(slot.get(), before);
    }

    #[test]
    fn borrowed_textures_are_never_deleted() {
        let mut dev = CpuDevice::new(OutputSize::new(1, 1)).with_recording();
        let camera = dev.upload_texture(&bitmap()).unwrap();
        let mut slot = TextureSlot::new();
        slot.install(&mut dev, TextureRef::borrowed(camera), OutputSize::new(2, 1));
        slot.release(&mut dev);
        assert!(dev.texture(camera).is_some());
        assert!(
            !dev.calls()
                .iter()
                .any(|c| matches!(c, DeviceCall::DeleteTexture(_)))
        );
    }
}
