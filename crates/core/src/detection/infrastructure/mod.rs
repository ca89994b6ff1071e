pub mod deadline_detector;
pub mod model_resolver;
pub mod onnx_face_detector;
pub mod on_demand_detector;
