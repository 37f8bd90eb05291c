//! Filter programs as opaque objects: the core only binds them and sets named uniforms.

use glam::Vec2;

use crate::backend::{FilterKind, GraphicsBackend, ProgramHandle, UniformValue};
use crate::error::BackendError;

/// A compiled filter program owned by its creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterProgram {
    kind: FilterKind,
    handle: ProgramHandle,
}

impl FilterProgram {
    /// Build the program for `kind` on `backend`.
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        kind: FilterKind,
    ) -> Result<Self, BackendError> {
        let handle = backend.create_program(kind)?;
        log::debug!("Built {kind:?} program #{}", handle.id());
        Ok(Self { kind, handle })
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    /// Make this program current.
    pub fn bind<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        backend.use_program(Some(self.handle));
    }

    pub fn set_int<B: GraphicsBackend + ?Sized>(&self, backend: &mut B, name: &str, value: i32) {
        backend.set_uniform(self.handle, name, UniformValue::Int(value));
    }

    pub fn set_float<B: GraphicsBackend + ?Sized>(&self, backend: &mut B, name: &str, value: f32) {
        backend.set_uniform(self.handle, name, UniformValue::Float(value));
    }

    pub fn set_vec2<B: GraphicsBackend + ?Sized>(&self, backend: &mut B, name: &str, value: Vec2) {
        backend.set_uniform(self.handle, name, UniformValue::Vec2(value));
    }

    /// Release the program. Consumes `self` so it cannot be bound afterwards.
    pub fn delete<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        backend.delete_program(self.handle);
    }
}
