//! Windows.Graphics.Capture backend
//!
//! Requires Windows 10 1903+ for window capture through
//! `IGraphicsCaptureItemInterop`.
//!
//! # Threading model
//!
//! Each session creates its own D3D11 device and a free-threaded frame pool
//! on the capture thread. `FrameArrived` and `Closed` fire on thread-pool
//! threads and only post into the capture thread's queue; the frame itself is
//! pulled later with `TryGetNextFrame` on the capture thread.
//!
//! ```text
//! HWND / HMONITOR
//!   │  IGraphicsCaptureItemInterop::CreateForWindow / CreateForMonitor
//!   ▼
//! GraphicsCaptureItem ──Closed──► CaptureSignal::source_closed
//!   │  Direct3D11CaptureFramePool::CreateFreeThreaded (BGRA8)
//!   ▼
//! GraphicsCaptureSession ──FrameArrived──► CaptureSignal::frame_arrived
//! ```

use std::ffi::c_void;
use std::mem::size_of;

use windows::core::{Interface, HSTRING};
use windows::Foundation::Metadata::ApiInformation;
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{
    Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem,
    GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Foundation::{HMODULE, HWND, RECT};
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11Texture2D, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
};
use windows::Win32::Graphics::Dwm::{DwmGetWindowAttribute, DWMWA_EXTENDED_FRAME_BOUNDS};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::Graphics::Gdi::HMONITOR;
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::System::WinRT::{RoInitialize, RoUninitialize, RO_INIT_MULTITHREADED};
use windows::Win32::UI::WindowsAndMessaging::GetForegroundWindow;

use super::{
    Capabilities, CaptureBackend, CaptureSession, CaptureSignal, CapturedFrame, SessionOptions,
    Texture,
};
use crate::error::{CaptureError, Result, CODE_FAILURE};
use crate::source::{CaptureSource, Size, WindowId};

const SESSION_CLASS: &str = "Windows.Graphics.Capture.GraphicsCaptureSession";
const UNIVERSAL_CONTRACT: &str = "Windows.Foundation.UniversalApiContract";

fn platform(context: &'static str) -> impl FnOnce(windows::core::Error) -> CaptureError {
    move |err| CaptureError::platform(context, err.code().0)
}

fn to_size(size: SizeInt32) -> Size {
    Size::new(size.Width.max(0) as u32, size.Height.max(0) as u32)
}

fn to_size_int32(size: Size) -> SizeInt32 {
    SizeInt32 {
        Width: size.width as i32,
        Height: size.height as i32,
    }
}

fn hwnd(window: WindowId) -> HWND {
    HWND(window.0 as usize as *mut c_void)
}

/// Windows.Graphics.Capture implementation of [`CaptureBackend`]
pub struct WgcBackend {
    capabilities: Capabilities,
}

impl WgcBackend {
    /// Probe the running OS for capture support
    pub fn new() -> Self {
        let capabilities = Self::probe();
        tracing::info!(?capabilities, "Windows.Graphics.Capture probed");
        Self { capabilities }
    }

    fn probe() -> Capabilities {
        let capture = GraphicsCaptureSession::IsSupported().unwrap_or(false);
        let contract = |major: u16| {
            ApiInformation::IsApiContractPresentByMajor(&HSTRING::from(UNIVERSAL_CONTRACT), major)
                .unwrap_or(false)
        };
        let property = |name: &str| {
            ApiInformation::IsPropertyPresent(&HSTRING::from(SESSION_CLASS), &HSTRING::from(name))
                .unwrap_or(false)
        };

        Capabilities {
            capture,
            window_capture: capture && contract(8),
            combined_desktop: false,
            cursor_control: capture && property("IsCursorCaptureEnabled"),
            picker: false,
        }
    }
}

impl Default for WgcBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for WgcBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn init_thread(&self) -> Result<()> {
        unsafe { RoInitialize(RO_INIT_MULTITHREADED) }.map_err(platform("RoInitialize"))
    }

    fn exit_thread(&self) {
        unsafe { RoUninitialize() };
    }

    fn open_session(
        &self,
        source: &CaptureSource,
        options: &SessionOptions,
        signal: CaptureSignal,
    ) -> Result<Box<dyn CaptureSession>> {
        if !self.capabilities.supports(source) {
            return Err(CaptureError::Unsupported("capture source kind"));
        }
        let session = WgcSession::open(source, options, signal, &self.capabilities)?;
        Ok(Box::new(session))
    }

    fn window_frame_bounds(&self, window: WindowId) -> Option<Size> {
        let mut rect = RECT::default();
        unsafe {
            DwmGetWindowAttribute(
                hwnd(window),
                DWMWA_EXTENDED_FRAME_BOUNDS,
                &mut rect as *mut RECT as *mut c_void,
                size_of::<RECT>() as u32,
            )
        }
        .ok()?;
        Some(Size::new(
            (rect.right - rect.left).max(0) as u32,
            (rect.bottom - rect.top).max(0) as u32,
        ))
    }

    fn foreground_window(&self) -> Option<WindowId> {
        let window = unsafe { GetForegroundWindow() };
        if window.0.is_null() {
            return None;
        }
        Some(WindowId(window.0 as usize as u64))
    }
}

struct WgcSession {
    device: IDirect3DDevice,
    item: GraphicsCaptureItem,
    pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    item_size: Size,
    pool_buffers: i32,
    frame_token: i64,
    closed_token: i64,
    closed: bool,
}

impl WgcSession {
    fn open(
        source: &CaptureSource,
        options: &SessionOptions,
        signal: CaptureSignal,
        capabilities: &Capabilities,
    ) -> Result<Self> {
        let device = create_device()?;
        let item = create_item(source)?;
        let size = item.Size().map_err(platform("GraphicsCaptureItem::Size"))?;
        let pool_buffers = options.pool_buffers as i32;

        let pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &device,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            pool_buffers,
            size,
        )
        .map_err(platform("CreateFreeThreaded"))?;
        let session = pool
            .CreateCaptureSession(&item)
            .map_err(platform("CreateCaptureSession"))?;

        if capabilities.cursor_control {
            session
                .SetIsCursorCaptureEnabled(options.cursor_capture)
                .map_err(platform("SetIsCursorCaptureEnabled"))?;
        }
        // Older builds have no border control
        let _ = session.SetIsBorderRequired(options.border_required);

        let frames = signal.clone();
        let frame_token = pool
            .FrameArrived(&TypedEventHandler::new(move |_, _| {
                frames.frame_arrived();
                Ok(())
            }))
            .map_err(platform("FrameArrived"))?;
        let closed_token = item
            .Closed(&TypedEventHandler::new(move |_, _| {
                signal.source_closed();
                Ok(())
            }))
            .map_err(platform("GraphicsCaptureItem::Closed"))?;

        session.StartCapture().map_err(platform("StartCapture"))?;
        tracing::debug!(source = %source, width = size.Width, height = size.Height, "WGC session started");

        Ok(Self {
            device,
            item,
            pool,
            session,
            item_size: to_size(size),
            pool_buffers,
            frame_token,
            closed_token,
            closed: false,
        })
    }
}

impl CaptureSession for WgcSession {
    fn item_size(&self) -> Size {
        self.item_size
    }

    fn try_next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        if self.closed {
            return Ok(None);
        }
        // An empty pool surfaces as a null frame
        let frame: Direct3D11CaptureFrame = match self.pool.TryGetNextFrame() {
            Ok(frame) => frame,
            Err(err) if err.code().is_ok() => return Ok(None),
            Err(err) => return Err(CaptureError::platform("TryGetNextFrame", err.code().0)),
        };

        let content = frame
            .ContentSize()
            .map_err(platform("Direct3D11CaptureFrame::ContentSize"))?;
        let surface = frame
            .Surface()
            .map_err(platform("Direct3D11CaptureFrame::Surface"))?;
        let access: IDirect3DDxgiInterfaceAccess =
            surface.cast().map_err(platform("IDirect3DDxgiInterfaceAccess"))?;
        let texture: ID3D11Texture2D =
            unsafe { access.GetInterface() }.map_err(platform("GetInterface"))?;

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut desc) };

        let handle = Texture {
            handle: texture.as_raw() as usize as u64,
            size: Size::new(desc.Width, desc.Height),
        };
        Ok(Some(
            CapturedFrame::new(handle, to_size(content)).with_guard(Box::new((frame, texture))),
        ))
    }

    fn recreate_pool(&mut self, size: Size) -> Result<()> {
        self.pool
            .Recreate(
                &self.device,
                DirectXPixelFormat::B8G8R8A8UIntNormalized,
                self.pool_buffers,
                to_size_int32(size),
            )
            .map_err(platform("Direct3D11CaptureFramePool::Recreate"))
    }

    fn set_cursor_capture(&mut self, enabled: bool) -> Result<()> {
        self.session
            .SetIsCursorCaptureEnabled(enabled)
            .map_err(platform("SetIsCursorCaptureEnabled"))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.pool.RemoveFrameArrived(self.frame_token);
        let _ = self.item.RemoveClosed(self.closed_token);
        let _ = self.session.Close();
        let _ = self.pool.Close();
        tracing::debug!("WGC session closed");
    }
}

impl Drop for WgcSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn create_device() -> Result<IDirect3DDevice> {
    let mut device: Option<ID3D11Device> = None;
    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            HMODULE::default(),
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            None,
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            None,
        )
    }
    .map_err(platform("D3D11CreateDevice"))?;
    let device =
        device.ok_or_else(|| CaptureError::platform("D3D11CreateDevice", CODE_FAILURE))?;

    let dxgi: IDXGIDevice = device.cast().map_err(platform("cast IDXGIDevice"))?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi) }
        .map_err(platform("CreateDirect3D11DeviceFromDXGIDevice"))?;
    inspectable.cast().map_err(platform("cast IDirect3DDevice"))
}

fn create_item(source: &CaptureSource) -> Result<GraphicsCaptureItem> {
    let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
        .map_err(platform("IGraphicsCaptureItemInterop factory"))?;

    match source {
        CaptureSource::Window(window) => {
            unsafe { interop.CreateForWindow(hwnd(*window)) }.map_err(|err| {
                // Invalid handles mean the window is already gone
                if err.code() == windows::Win32::Foundation::E_INVALIDARG {
                    CaptureError::SourceClosed
                } else {
                    CaptureError::platform("CreateForWindow", err.code().0)
                }
            })
        }
        CaptureSource::Monitor(monitor) => {
            let monitor = HMONITOR(monitor.0 as usize as *mut c_void);
            unsafe { interop.CreateForMonitor(monitor) }.map_err(platform("CreateForMonitor"))
        }
        CaptureSource::CombinedDesktop => Err(CaptureError::Unsupported("combined desktop capture")),
    }
}
