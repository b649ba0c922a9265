//! Reference blueprints for the vectorAzul environment.
//!
//! Two independently deployable stacks:
//!
//! - [`parameter_store_stack`] publishes the project and environment names
//!   as the `projectAzul` and `environmentAzul` exports.
//! - [`configuration_stack`] imports both to name its network, role,
//!   function, and API, and imports the token verifier's identifier for
//!   its authorizer.
//!
//! The verifier export ([`VERIFIER_EXPORT`]) is owned by a stack outside
//! this pair and must be registered before the configuration stack can be
//! planned.

use stackwire_common::error::Result;
use stackwire_common::types::{RemovalPolicy, ResourceKind};
use stackwire_compose::model::{StackUnit, Value};

use crate::builder::{ResourceBuilder, StackBuilder};

/// Name of the parameter-store stack.
pub const PARAMETER_STORE_STACK: &str = "parameterstore-stack";
/// Name of the configuration stack.
pub const CONFIGURATION_STACK: &str = "config-stack";
/// Export carrying the project name.
pub const PROJECT_EXPORT: &str = "projectAzul";
/// Export carrying the environment name.
pub const ENVIRONMENT_EXPORT: &str = "environmentAzul";
/// Export carrying the token verifier identifier.
pub const VERIFIER_EXPORT: &str = "KmsVerifyARN";

/// Project and environment parameters.
///
/// # Errors
///
/// Returns an error only if the declarations fail validation.
pub fn parameter_store_stack() -> Result<StackUnit> {
    StackBuilder::new(PARAMETER_STORE_STACK)
        .resource(
            ResourceBuilder::new("ProjectParam", ResourceKind::Parameter)
                .property("parameterName", "/vectorAzul/ProjectName")
                .property("stringValue", "vectorAzul")
                .property("description", "the name of project")
                .property("type", "String")
                .property("tier", "Standard")
                .property("allowedPattern", ".*"),
        )
        .resource(
            ResourceBuilder::new("EnvironmentsParam", ResourceKind::Parameter)
                .property("parameterName", "/vectorAzul/environments")
                .property("stringValue", "dev")
                .property("tier", "Advanced"),
        )
        .export(
            "vectorProjectRef",
            PROJECT_EXPORT,
            Value::attr("ProjectParam", "value"),
            "The name of project",
        )
        .export(
            "vectorEnvironmentsRef",
            ENVIRONMENT_EXPORT,
            Value::attr("EnvironmentsParam", "value"),
            "The environments name of project",
        )
        .build()
}

/// Network, bucket, role, function, API, and authorizer of the
/// configuration service.
///
/// The function receives the name of the parameter holding its password,
/// never the password itself.
///
/// # Errors
///
/// Returns an error only if a template or declaration is malformed.
pub fn configuration_stack() -> Result<StackUnit> {
    StackBuilder::new(CONFIGURATION_STACK)
        .parameter(
            "BucketNameConfiguracion",
            "BucketConfiguracion",
            "Nombre del bucket para el catalogo de emisoras",
        )
        .constrain_parameter(
            "BucketNameConfiguracion",
            ".*[^0-9]",
            "Debe de ser caracteres no numericos",
        )
        .parameter(
            "PasswordParameterName",
            "/vectorAzul/configuracion/password",
            "Parameter holding the configuration service password",
        )
        .resource(network())
        .resource(subnet("Subnet1", "20.20.1.0/24", "${import:projectAzul}-${import:environmentAzul}-Subnet-1"))
        .resource(subnet("Subnet2", "20.20.2.0/24", "${import:projectAzul}-Subnet-2"))
        .resource(
            ResourceBuilder::new("BucketConfiguracion", ResourceKind::Bucket)
                .property("bucketName", Value::param("BucketNameConfiguracion"))
                .property("versioned", true)
                .property("autoDeleteObjects", true)
                .removal_policy(RemovalPolicy::Destroy),
        )
        .resource(role())
        .resource(function())
        .resource(api())
        .resource(
            ResourceBuilder::new("ConfiguracionAuthorizer", ResourceKind::Authorizer)
                .property("name", "authKMSConfig")
                .property("type", "TOKEN")
                .property("identitySource", "method.request.header.Authorization")
                .property("identityValidationExpression", "Bearer (.*)")
                .property("restApiId", Value::attr("ConfiguracionApi", "restApiId"))
                .property("authorizerUri", Value::import(VERIFIER_EXPORT)),
        )
        .output("configuracionApiUrl", Value::attr("ConfiguracionApi", "url"))
        .output("configuracionBucketArn", Value::attr("BucketConfiguracion", "bucketArn"))
        .build()
}

fn network() -> ResourceBuilder {
    ResourceBuilder::new("VPC", ResourceKind::Network)
        .property("cidrBlock", "10.10.0.0/10")
        .property("enableDnsSupport", true)
        .property("enableDnsHostnames", true)
        .property("instanceTenancy", "default")
        .tag_sub("Name", "${import:projectAzul}-VPC")
        .tag("Proyecto", Value::import(PROJECT_EXPORT))
}

fn subnet(id: &str, cidr: &str, name: &str) -> ResourceBuilder {
    ResourceBuilder::new(id, ResourceKind::Subnet)
        .property("vpcId", Value::attr("VPC", "vpcId"))
        .property("cidrBlock", cidr)
        .property("availabilityZone", "us-east-1a")
        .tag_sub("Name", name)
        .tag("Proyecto", Value::import(PROJECT_EXPORT))
}

fn role() -> ResourceBuilder {
    ResourceBuilder::new("ConfiguracionRole", ResourceKind::Role)
        .sub("roleName", "${import:projectAzul}-${import:environmentAzul}-configuracion-role")
        .property("assumedBy", "lambda.amazonaws.com")
        .property("path", "/service-role/")
        .property(
            "inlinePolicy",
            Value::list([Value::map([
                ("name", Value::from("root")),
                ("effect", Value::from("Allow")),
                (
                    "actions",
                    Value::list([
                        "logs:CreateLogGroup",
                        "logs:CreateLogStream",
                        "logs:PutLogEvents",
                        "lambda:InvokeFunction",
                        "lambda:InvokeAsync",
                    ]),
                ),
                ("resources", Value::list(["*"])),
            ])]),
        )
        .property(
            "managedPolicies",
            Value::list([
                "service-role/AWSLambdaVPCAccessExecutionRole",
                "AmazonDynamoDBFullAccess",
                "AWSLambdaExecute",
            ]),
        )
}

fn function() -> ResourceBuilder {
    ResourceBuilder::new("ConfiguracionFunction", ResourceKind::Function)
        .sub("functionName", "${import:projectAzul}-${import:environmentAzul}-configuracion-lambda")
        .property("description", "Funcion lambda test configuracion")
        .property("architecture", "x86_64")
        .property("runtime", "python3.7")
        .property("handler", "configuracion.lambda_handler")
        .property("memorySize", 128_u64)
        .property("timeoutSeconds", 3_u64)
        .property("tracing", "Active")
        .property("role", Value::attr("ConfiguracionRole", "roleArn"))
        .property(
            "environment",
            Value::map([
                ("ApplicationID", Value::from("VectorAzulComMx")),
                ("PasswordParameter", Value::param("PasswordParameterName")),
                ("Tabla", Value::from("VA-configuracion")),
                ("environ", Value::from("vectorAzul")),
            ]),
        )
        .tag("Name", "vectorAzul")
        .tag("Ambiente", "Dev")
        .tag("Runtime", "Python 3.7")
        .tag("API", "Configuracion")
        .tag("Tipo", "API")
}

fn api() -> ResourceBuilder {
    ResourceBuilder::new("ConfiguracionApi", ResourceKind::Api)
        .property("name", "vectorAzul-ApisVectorConfiguracion")
        .property("description", "API Gateway para el APIs Vector Azul Configuracion")
        .property("stageName", "Dev")
        .property("tracingEnabled", true)
        .property(
            "cors",
            Value::map([
                (
                    "allowHeaders",
                    Value::list([
                        "Content-Type",
                        "canal",
                        "cuentasesion",
                        "X-Amz-Date",
                        "Authorization",
                        "X-Api-Key",
                        "X-Amz-Security-Token",
                        "token",
                        "id",
                    ]),
                ),
                ("allowMethods", Value::list(["DELETE", "GET", "HEAD", "POST", "PUT", "PATCH"])),
                ("allowCredentials", Value::from(true)),
                ("allowOrigins", Value::list(["*"])),
            ]),
        )
        .property(
            "requestValidator",
            Value::map([
                ("name", Value::from("validateApiConfig")),
                ("validateRequestBody", Value::from(true)),
                ("validateRequestParameters", Value::from(true)),
            ]),
        )
        .property(
            "routes",
            Value::list([Value::map([
                ("path", Value::from("configuracion")),
                ("method", Value::from("GET")),
                ("integration", Value::attr("ConfiguracionFunction", "functionArn")),
                ("passthroughBehavior", Value::from("WHEN_NO_MATCH")),
                ("contentHandling", Value::from("CONVERT_TO_TEXT")),
                ("statusCode", Value::from("200")),
                (
                    "requestParameters",
                    Value::map([("method.request.querystring.nombre", Value::from(true))]),
                ),
            ])]),
        )
}
