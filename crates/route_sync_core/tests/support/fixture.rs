#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use route_sync_core::binding::FunctionTarget;
use route_sync_core::controller::RunConfig;
use route_sync_core::declaration::{ModuleDeclaration, DECLARATION_FILE_NAME};
use route_sync_core::reconciler::{ReconcileReport, Reconciler};
use route_sync_core::retry::RetryPolicy;
use route_sync_core::testing::{InMemoryApiGateway, InMemoryFunctionDirectory};
use route_sync_core::tree::ResourceTreeIndex;

pub const API_NAME: &str = "MainApiGateway";
pub const REGION: &str = "us-east-1";
pub const ACCOUNT_ID: &str = "123456789012";

/// A shared API with one registered function per module.
pub struct Fixture {
    pub gateway: InMemoryApiGateway,
    pub functions: InMemoryFunctionDirectory,
    pub api_id: String,
    pub retry: RetryPolicy,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_gateway(InMemoryApiGateway::new())
    }

    pub fn with_gateway(gateway: InMemoryApiGateway) -> Self {
        let api_id = gateway.add_api(API_NAME);
        let functions = InMemoryFunctionDirectory::new();
        for module in ["users", "orders"] {
            functions.add_function(&format!("project-{module}"), REGION, ACCOUNT_ID);
        }
        Self {
            gateway,
            functions,
            api_id,
            retry: RetryPolicy::immediate(3),
        }
    }

    pub fn target(&self, module: &str) -> FunctionTarget {
        FunctionTarget::from_arn(&format!(
            "arn:aws:lambda:{REGION}:{ACCOUNT_ID}:function:project-{module}"
        ))
        .expect("fixture arn should parse")
    }

    pub fn declaration(&self, module: &str, paths: &[&str]) -> ModuleDeclaration {
        ModuleDeclaration::with_paths(module, format!("project-{module}"), paths)
    }

    pub fn index(&self) -> ResourceTreeIndex {
        ResourceTreeIndex::build(&self.gateway, &self.api_id, &self.retry)
            .expect("index should build")
    }

    /// Builds a fresh index and reconciles `declaration` against it, as one run would.
    pub fn reconcile(&self, declaration: &ModuleDeclaration) -> ReconcileReport {
        let target = self.target(&declaration.module);
        let mut index = self.index();
        Reconciler::new(
            &self.gateway,
            &self.functions,
            &self.api_id,
            &target,
            &self.retry,
        )
        .reconcile(declaration, &mut index)
    }
}

pub fn write_module(modules_dir: &Path, module: &str, json: &str) {
    let module_dir = modules_dir.join(module);
    fs::create_dir_all(&module_dir).expect("module dir should be created");
    fs::write(module_dir.join(DECLARATION_FILE_NAME), json).expect("declaration should be written");
}

pub fn run_config(modules_dir: &Path, module: &str) -> RunConfig {
    let mut config = RunConfig::new(module, "prod");
    config.modules_dir = modules_dir.to_path_buf();
    config.retry = RetryPolicy::immediate(3);
    config.deploy_timeout = Duration::from_secs(2);
    config.poll_interval = Duration::from_millis(1);
    config
}
